//! Automated resubmission engine
//!
//! Enforces per-claim attempt caps, derives and applies corrections,
//! re-invokes the orchestrator, and tracks recovered-value metrics.
//! Attempts for one claim are processed sequentially; distinct claims
//! interleave freely.

use crate::corrections::{analyze_rejection, apply_corrections, ClaimCorrection, ReferenceData};
use crate::{catalog, APPLY_CONFIDENCE_FLOOR};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claims_common::config::ResubmissionConfig;
use claims_common::{ClaimRequest, CompositeOutcome};
use claims_orchestrator::IntegrationOrchestrator;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Strategy governing resubmission behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmissionStrategy {
    pub max_attempts: u32,
    pub retry_delay_hours: u32,
    pub escalate_after_attempts: u32,
    pub auto_correct_enabled: bool,
    pub notify_on_failure: bool,
}

impl Default for ResubmissionStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_hours: 24,
            escalate_after_attempts: 2,
            auto_correct_enabled: true,
            notify_on_failure: true,
        }
    }
}

impl From<&ResubmissionConfig> for ResubmissionStrategy {
    fn from(config: &ResubmissionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay_hours: config.retry_delay_hours,
            escalate_after_attempts: config.escalate_after_attempts,
            auto_correct_enabled: config.auto_correct_enabled,
            notify_on_failure: config.notify_on_failure,
        }
    }
}

/// Status of a resubmission attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Submitted,
    Accepted,
    Rejected,
    Failed,
}

/// Record of one resubmission attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmissionAttempt {
    pub claim_id: String,
    pub original_submission_date: DateTime<Utc>,
    pub rejection_code: String,
    pub rejection_reason: String,
    /// Strictly increasing per claim, starting at 1
    pub attempt_number: u32,
    pub attempted_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub corrections_applied: Vec<ClaimCorrection>,
    pub correction_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CompositeOutcome>,
}

/// Seam to the orchestrator so the engine is testable in isolation
#[async_trait]
pub trait ClaimSubmitter: Send + Sync {
    async fn submit(&self, claim: ClaimRequest) -> CompositeOutcome;
}

#[async_trait]
impl ClaimSubmitter for IntegrationOrchestrator {
    async fn submit(&self, claim: ClaimRequest) -> CompositeOutcome {
        self.submit_claim(claim, None, None).await
    }
}

/// Metrics surface of the resubmission engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResubmissionMetrics {
    pub total_resubmissions: u64,
    pub successful_resubmissions: u64,
    pub failed_resubmissions: u64,
    pub auto_corrected: u64,
    pub manual_review_required: u64,
    pub total_recovered_amount: f64,
    pub success_rate: f64,
    pub average_recovered_per_claim: f64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_resubmissions: u64,
    successful_resubmissions: u64,
    failed_resubmissions: u64,
    auto_corrected: u64,
    manual_review_required: u64,
    total_recovered_amount: f64,
}

/// Rejection-driven resubmission engine
pub struct ResubmissionEngine {
    submitter: Arc<dyn ClaimSubmitter>,
    refdata: Arc<dyn ReferenceData>,
    strategy: ResubmissionStrategy,
    history: RwLock<HashMap<String, Vec<ResubmissionAttempt>>>,
    claim_locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: SyncMutex<MetricsInner>,
}

impl ResubmissionEngine {
    pub fn new(
        submitter: Arc<dyn ClaimSubmitter>,
        refdata: Arc<dyn ReferenceData>,
        strategy: ResubmissionStrategy,
    ) -> Self {
        ResubmissionEngine {
            submitter,
            refdata,
            strategy,
            history: RwLock::new(HashMap::new()),
            claim_locks: DashMap::new(),
            metrics: SyncMutex::new(MetricsInner::default()),
        }
    }

    pub fn strategy(&self) -> &ResubmissionStrategy {
        &self.strategy
    }

    /// Whether the rejection code allows automatic resubmission
    pub fn can_auto_resubmit(&self, rejection_code: &str) -> bool {
        catalog().auto_resubmittable(rejection_code)
    }

    fn claim_lock(&self, claim_id: &str) -> Arc<Mutex<()>> {
        self.claim_locks
            .entry(claim_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn original_submission_date(claim: &ClaimRequest) -> DateTime<Utc> {
        claim
            .extra
            .get("submission_date")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now)
    }

    fn rejection_reason(details: &serde_json::Value) -> String {
        details
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string()
    }

    /// Resubmit a rejected claim with corrections.
    ///
    /// Only attempts that actually reach submission are appended to the
    /// claim's history; cap-exceeded and manual-review attempts are
    /// returned without being stored, so their `attempt_number` stays
    /// fixed on repeated calls. Submission errors become an attempt with
    /// `status = Failed` rather than propagating.
    pub async fn resubmit(
        &self,
        claim_id: &str,
        rejection_code: &str,
        rejection_details: serde_json::Value,
        claim: ClaimRequest,
        claim_amount: f64,
    ) -> ResubmissionAttempt {
        // Attempts for one claim are strictly sequential
        let lock = self.claim_lock(claim_id);
        let _guard = lock.lock().await;

        let attempt_number = self.history.read().await.get(claim_id).map_or(0, |a| a.len()) as u32 + 1;
        let original_submission_date = Self::original_submission_date(&claim);
        let rejection_reason = Self::rejection_reason(&rejection_details);

        let base = ResubmissionAttempt {
            claim_id: claim_id.to_string(),
            original_submission_date,
            rejection_code: rejection_code.to_string(),
            rejection_reason,
            attempt_number,
            attempted_at: Utc::now(),
            status: AttemptStatus::Pending,
            corrections_applied: Vec::new(),
            correction_summary: String::new(),
            result: None,
        };

        // Attempt cap: escalate to manual review, no portal traffic.
        // Nothing real happened, so the attempt is not appended to history.
        if attempt_number > self.strategy.max_attempts {
            error!(
                "Max resubmission attempts ({}) reached for claim {}",
                self.strategy.max_attempts, claim_id
            );
            self.metrics.lock().manual_review_required += 1;

            return ResubmissionAttempt {
                status: AttemptStatus::Failed,
                correction_summary: "Max attempts reached - manual review required".to_string(),
                ..base
            };
        }

        let claim_value = match serde_json::to_value(&claim) {
            Ok(value) => value,
            Err(e) => {
                return ResubmissionAttempt {
                    status: AttemptStatus::Failed,
                    correction_summary: format!("Claim serialization error: {}", e),
                    ..base
                }
            }
        };

        let corrections = if self.strategy.auto_correct_enabled {
            analyze_rejection(&claim_value, rejection_code, &rejection_details, self.refdata.as_ref())
                .await
        } else {
            Vec::new()
        };

        if corrections.is_empty() && !self.can_auto_resubmit(rejection_code) {
            warn!(
                "No corrections for claim {} with rejection {}; escalating to manual review",
                claim_id, rejection_code
            );
            self.metrics.lock().manual_review_required += 1;

            return ResubmissionAttempt {
                status: AttemptStatus::Pending,
                correction_summary: "Manual review required - cannot auto-correct".to_string(),
                ..base
            };
        }

        // Apply corrections to a deep copy; low-confidence ones are skipped
        let corrected_value = apply_corrections(&claim_value, &corrections);
        let corrected_claim: ClaimRequest = match serde_json::from_value(corrected_value) {
            Ok(claim) => claim,
            Err(e) => {
                error!("Corrected claim no longer deserializes: {}", e);
                return ResubmissionAttempt {
                    status: AttemptStatus::Failed,
                    corrections_applied: corrections,
                    correction_summary: format!("Correction application error: {}", e),
                    ..base
                };
            }
        };

        let applied: Vec<ClaimCorrection> = corrections
            .iter()
            .filter(|c| c.confidence >= APPLY_CONFIDENCE_FLOOR)
            .cloned()
            .collect();
        let summary = if applied.is_empty() {
            "Resubmitted without changes".to_string()
        } else {
            applied
                .iter()
                .map(|c| c.reason.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let result = self.submitter.submit(corrected_claim).await;
        let accepted = result.success;

        {
            let mut metrics = self.metrics.lock();
            metrics.total_resubmissions += 1;
            if accepted {
                metrics.successful_resubmissions += 1;
                metrics.total_recovered_amount += claim_amount;
                if !applied.is_empty() {
                    metrics.auto_corrected += 1;
                }
            } else {
                metrics.failed_resubmissions += 1;
            }
        }

        let attempt = ResubmissionAttempt {
            status: if accepted {
                AttemptStatus::Accepted
            } else {
                AttemptStatus::Rejected
            },
            corrections_applied: applied,
            correction_summary: summary,
            result: Some(result),
            ..base
        };
        self.record_attempt(attempt.clone()).await;

        info!(
            "Resubmission attempt {} for claim {}: {:?}",
            attempt_number, claim_id, attempt.status
        );
        attempt
    }

    async fn record_attempt(&self, attempt: ResubmissionAttempt) {
        self.history
            .write()
            .await
            .entry(attempt.claim_id.clone())
            .or_default()
            .push(attempt);
    }

    /// Attempt history for a claim, in submission order
    pub async fn history(&self, claim_id: &str) -> Vec<ResubmissionAttempt> {
        self.history
            .read()
            .await
            .get(claim_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the engine metrics
    pub fn metrics(&self) -> ResubmissionMetrics {
        let inner = self.metrics.lock();
        let success_rate = if inner.total_resubmissions > 0 {
            inner.successful_resubmissions as f64 / inner.total_resubmissions as f64
        } else {
            0.0
        };
        let average_recovered_per_claim = if inner.successful_resubmissions > 0 {
            inner.total_recovered_amount / inner.successful_resubmissions as f64
        } else {
            0.0
        };

        ResubmissionMetrics {
            total_resubmissions: inner.total_resubmissions,
            successful_resubmissions: inner.successful_resubmissions,
            failed_resubmissions: inner.failed_resubmissions,
            auto_corrected: inner.auto_corrected,
            manual_review_required: inner.manual_review_required,
            total_recovered_amount: inner.total_recovered_amount,
            success_rate,
            average_recovered_per_claim,
        }
    }
}
