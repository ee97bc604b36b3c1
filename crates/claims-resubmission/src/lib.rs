//! Rejection-code-driven claim resubmission
//!
//! Analyzes rejection codes against the static catalog, derives
//! deterministic corrections, enforces per-claim attempt caps, and tracks
//! recovered-value metrics.

pub mod catalog;
pub mod corrections;
pub mod engine;

pub use catalog::{
    catalog, RejectionCatalog, RejectionCategory, RejectionCodeEntry, RejectionSeverity,
};
pub use corrections::{
    analyze_rejection, apply_corrections, ClaimCorrection, EmptyReferenceData, ReferenceData,
    APPLY_CONFIDENCE_FLOOR,
};
pub use engine::{
    AttemptStatus, ClaimSubmitter, ResubmissionAttempt, ResubmissionEngine, ResubmissionMetrics,
    ResubmissionStrategy,
};
