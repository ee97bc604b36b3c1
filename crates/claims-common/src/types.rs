//! Common types shared across the integration gateway

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of an upstream portal ("nphies", "oases", ...)
pub type PortalId = String;

/// Claim category recognized by NPHIES and the legacy portals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Institutional,
    Professional,
    Pharmacy,
}

impl Default for ClaimType {
    fn default() -> Self {
        ClaimType::Institutional
    }
}

impl ClaimType {
    /// FHIR claim-type code used at the portal boundary
    pub fn as_code(&self) -> &'static str {
        match self {
            ClaimType::Institutional => "institutional",
            ClaimType::Professional => "professional",
            ClaimType::Pharmacy => "pharmacy",
        }
    }
}

/// Single billable line on a claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimItem {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_date: Option<NaiveDate>,
}

impl ClaimItem {
    /// Net value of the line (`quantity * unit_price`)
    pub fn net(&self) -> f64 {
        self.quantity * self.unit_price
    }
}

/// Claim submission request accepted by the orchestrator
///
/// Immutable once submitted. The optimizer may produce a derived copy that
/// carries additional attributes in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClaimRequest {
    pub patient_id: String,
    pub member_id: String,
    pub payer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_date: Option<NaiveDate>,
    pub items: Vec<ClaimItem>,
    #[serde(default)]
    pub claim_type: ClaimType,
    pub total_amount: f64,
    pub insurance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_auth_ref: Option<String>,
    /// Attributes not modeled explicitly (populated by optimization or
    /// resubmission corrections)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ClaimRequest {
    /// Sum of the net values of all items
    pub fn items_total(&self) -> f64 {
        self.items.iter().map(ClaimItem::net).sum()
    }
}

/// Outcome of one submission attempt against one portal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalOutcome {
    pub portal: PortalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl PortalOutcome {
    /// Build a failure outcome for a portal that could not be reached
    pub fn failure(portal: impl Into<String>, branch: Option<String>, error: impl Into<String>) -> Self {
        PortalOutcome {
            portal: portal.into(),
            branch,
            success: false,
            claim_id: None,
            status: None,
            error: Some(error.into()),
            raw: serde_json::Value::Null,
        }
    }
}

/// Pipeline stage a composite outcome was produced at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Authentication,
    Submission,
}

/// Claim submission strategies supported by the orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStrategy {
    NphiesOnly,
    LegacyOnly,
    /// Try NPHIES, fall back to the legacy fan-out on failure
    NphiesFirst,
    /// Dispatch NPHIES and the legacy fan-out concurrently
    AllPortals,
    /// Routing rule table selects one of the above from claim attributes
    SmartRoute,
}

impl Default for SubmissionStrategy {
    fn default() -> Self {
        SubmissionStrategy::NphiesFirst
    }
}

/// Report produced by the claim validator capability
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub confidence: f64,
}

impl ValidationReport {
    pub fn valid() -> Self {
        ValidationReport {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            confidence: 1.0,
        }
    }
}

/// Report produced by the claim optimizer capability
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OptimizationReport {
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized: Option<ClaimRequest>,
}

/// Aggregate outcome of a multi-portal submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeOutcome {
    /// Disjunction of per-portal successes
    pub success: bool,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SubmissionStrategy>,
    /// Iteration order of this map is not meaningful
    #[serde(default)]
    pub per_portal: HashMap<String, PortalOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompositeOutcome {
    /// Outcome for a claim rejected by validation (no portal traffic)
    pub fn validation_failure(report: ValidationReport) -> Self {
        CompositeOutcome {
            success: false,
            stage: Stage::Validation,
            strategy: None,
            per_portal: HashMap::new(),
            validation: Some(report),
            optimization: None,
            error: Some("claim failed validation".to_string()),
        }
    }

    /// Aggregate per-portal outcomes into a submission-stage composite
    pub fn from_outcomes(
        strategy: SubmissionStrategy,
        per_portal: HashMap<String, PortalOutcome>,
    ) -> Self {
        let success = per_portal.values().any(|o| o.success);
        CompositeOutcome {
            success,
            stage: Stage::Submission,
            strategy: Some(strategy),
            per_portal,
            validation: None,
            optimization: None,
            error: None,
        }
    }
}
