//! Claim validator and optimizer capabilities
//!
//! The orchestrator consumes these as external capabilities; the
//! rule-based implementations here cover the checks every deployment
//! needs before any portal traffic is generated.

use async_trait::async_trait;
use claims_common::{ClaimRequest, OptimizationReport, Result, ValidationReport};

const AMOUNT_TOLERANCE: f64 = 0.01;

/// Validates a claim before submission
#[async_trait]
pub trait ClaimValidator: Send + Sync {
    async fn validate(&self, claim: &ClaimRequest) -> Result<ValidationReport>;
}

/// Produces an optimized copy of a claim
#[async_trait]
pub trait ClaimOptimizer: Send + Sync {
    async fn optimize(&self, claim: &ClaimRequest) -> Result<OptimizationReport>;
}

/// Deterministic validation of required fields and amount consistency
#[derive(Default)]
pub struct RuleBasedValidator;

#[async_trait]
impl ClaimValidator for RuleBasedValidator {
    async fn validate(&self, claim: &ClaimRequest) -> Result<ValidationReport> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if claim.patient_id.trim().is_empty() {
            errors.push("patient_id is required".to_string());
        }
        if claim.insurance_id.trim().is_empty() {
            errors.push("insurance_id is required".to_string());
        }
        if claim.items.is_empty() {
            errors.push("claim has no items".to_string());
        }

        for (idx, item) in claim.items.iter().enumerate() {
            if item.code.trim().is_empty() {
                errors.push(format!("item {} has no service code", idx + 1));
            }
            if item.quantity <= 0.0 {
                errors.push(format!("item {} has non-positive quantity", idx + 1));
            }
            if item.unit_price < 0.0 {
                errors.push(format!("item {} has negative unit price", idx + 1));
            }
        }

        if !claim.items.is_empty()
            && (claim.total_amount - claim.items_total()).abs() > AMOUNT_TOLERANCE
        {
            errors.push(format!(
                "total_amount {} does not match item total {}",
                claim.total_amount,
                claim.items_total()
            ));
        }

        if claim.member_id.trim().is_empty() {
            warnings.push("member_id is empty".to_string());
        }
        if claim.service_date.is_none() {
            warnings.push("service_date not provided, portal will default to today".to_string());
        }

        let confidence = if !errors.is_empty() {
            0.0
        } else {
            (1.0 - 0.1 * warnings.len() as f64).max(0.5)
        };

        Ok(ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            confidence,
        })
    }
}

/// Optimizer that passes the claim through unchanged
#[derive(Default)]
pub struct PassthroughOptimizer;

#[async_trait]
impl ClaimOptimizer for PassthroughOptimizer {
    async fn optimize(&self, _claim: &ClaimRequest) -> Result<OptimizationReport> {
        Ok(OptimizationReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims_common::ClaimItem;

    fn valid_claim() -> ClaimRequest {
        ClaimRequest {
            patient_id: "p1".to_string(),
            member_id: "m1".to_string(),
            payer_id: "payer".to_string(),
            items: vec![ClaimItem {
                code: "99213".to_string(),
                description: None,
                quantity: 1.0,
                unit_price: 150.0,
                service_date: None,
            }],
            total_amount: 150.0,
            insurance_id: "NPHIES-X".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn accepts_consistent_claim() {
        let report = RuleBasedValidator.validate(&valid_claim()).await.unwrap();
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert!(report.confidence > 0.5);
    }

    #[tokio::test]
    async fn rejects_empty_items() {
        let mut claim = valid_claim();
        claim.items.clear();

        let report = RuleBasedValidator.validate(&claim).await.unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("no items")));
        assert_eq!(report.confidence, 0.0);
    }

    #[tokio::test]
    async fn rejects_total_mismatch() {
        let mut claim = valid_claim();
        claim.total_amount = 200.0;

        let report = RuleBasedValidator.validate(&claim).await.unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("does not match")));
    }

    #[tokio::test]
    async fn warns_on_missing_member_id() {
        let mut claim = valid_claim();
        claim.member_id.clear();

        let report = RuleBasedValidator.validate(&claim).await.unwrap();
        assert!(report.is_valid);
        assert!(!report.warnings.is_empty());
        assert!(report.confidence < 1.0);
    }
}
