//! Correction derivation and application
//!
//! Each rejection code maps to a deterministic correction strategy. A
//! correction carries a confidence score; anything below the floor is
//! skipped at application time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Corrections below this confidence are not applied
pub const APPLY_CONFIDENCE_FLOOR: f64 = 0.70;

/// One proposed change to a claim field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimCorrection {
    /// Dotted path into the claim ("patient.nationality", "total_amount")
    pub field_path: String,
    pub old_value: Value,
    pub new_value: Value,
    pub reason: String,
    /// 0.0 to 1.0
    pub confidence: f64,
}

/// External lookups consulted when deriving corrections
#[async_trait]
pub trait ReferenceData: Send + Sync {
    /// Value for a missing claim field
    async fn field_value(&self, claim: &Value, field: &str) -> Option<Value>;

    /// Map an invalid diagnosis code to a valid ICD-10 code
    async fn map_diagnosis_code(&self, code: &str) -> Option<String>;

    /// Map an invalid procedure code to a valid CPT code
    async fn map_procedure_code(&self, code: &str) -> Option<String>;

    /// Correct authorization for (patient, service date)
    async fn authorization_for(&self, patient_id: &str, service_date: Option<&str>)
        -> Option<String>;

    /// Patient master record fields
    async fn patient_details(&self, patient_id: &str) -> serde_json::Map<String, Value>;

    /// Provider master record fields
    async fn provider_details(&self, provider_id: &str) -> serde_json::Map<String, Value>;
}

/// Reference data source that knows nothing; every lookup misses
#[derive(Default)]
pub struct EmptyReferenceData;

#[async_trait]
impl ReferenceData for EmptyReferenceData {
    async fn field_value(&self, _claim: &Value, _field: &str) -> Option<Value> {
        None
    }
    async fn map_diagnosis_code(&self, _code: &str) -> Option<String> {
        None
    }
    async fn map_procedure_code(&self, _code: &str) -> Option<String> {
        None
    }
    async fn authorization_for(&self, _patient_id: &str, _date: Option<&str>) -> Option<String> {
        None
    }
    async fn patient_details(&self, _patient_id: &str) -> serde_json::Map<String, Value> {
        serde_json::Map::new()
    }
    async fn provider_details(&self, _provider_id: &str) -> serde_json::Map<String, Value> {
        serde_json::Map::new()
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

fn str_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Analyze a rejection and derive the corrections to apply.
///
/// Unknown codes yield no corrections; the engine decides between manual
/// review and an unchanged resubmit.
pub async fn analyze_rejection(
    claim: &Value,
    rejection_code: &str,
    details: &Value,
    refdata: &dyn ReferenceData,
) -> Vec<ClaimCorrection> {
    if crate::catalog().get(rejection_code).is_none() {
        warn!("Unknown rejection code: {}", rejection_code);
        return Vec::new();
    }

    match rejection_code {
        "TECH02" => correct_missing_fields(claim, details, refdata).await,
        "CD01" => correct_diagnosis_code(details, refdata).await,
        "CD02" => correct_procedure_code(details, refdata).await,
        "PR01" => correct_pricing(claim, details),
        "PA03" => correct_authorization(claim, refdata).await,
        "INC01" => correct_patient_info(claim, details, refdata).await,
        "INC02" => correct_provider_info(claim, details, refdata).await,
        _ => Vec::new(),
    }
}

async fn correct_missing_fields(
    claim: &Value,
    details: &Value,
    refdata: &dyn ReferenceData,
) -> Vec<ClaimCorrection> {
    let mut corrections = Vec::new();
    for field in str_list(details, "missing_fields") {
        if let Some(new_value) = refdata.field_value(claim, &field).await {
            corrections.push(ClaimCorrection {
                field_path: field,
                old_value: Value::Null,
                new_value,
                reason: "Populated missing required field".to_string(),
                confidence: 0.90,
            });
        }
    }
    corrections
}

async fn correct_diagnosis_code(details: &Value, refdata: &dyn ReferenceData) -> Vec<ClaimCorrection> {
    let Some(invalid) = str_field(details, "invalid_diagnosis_code") else {
        return Vec::new();
    };
    match refdata.map_diagnosis_code(invalid).await {
        Some(valid) => vec![ClaimCorrection {
            field_path: "diagnosis_code".to_string(),
            old_value: Value::String(invalid.to_string()),
            new_value: Value::String(valid),
            reason: "Mapped to valid ICD-10 code".to_string(),
            confidence: 0.85,
        }],
        None => Vec::new(),
    }
}

async fn correct_procedure_code(details: &Value, refdata: &dyn ReferenceData) -> Vec<ClaimCorrection> {
    let Some(invalid) = str_field(details, "invalid_procedure_code") else {
        return Vec::new();
    };
    match refdata.map_procedure_code(invalid).await {
        Some(valid) => vec![ClaimCorrection {
            field_path: "procedure_code".to_string(),
            old_value: Value::String(invalid.to_string()),
            new_value: Value::String(valid),
            reason: "Mapped to valid CPT code".to_string(),
            confidence: 0.85,
        }],
        None => Vec::new(),
    }
}

fn correct_pricing(claim: &Value, details: &Value) -> Vec<ClaimCorrection> {
    let claimed = claim.get("total_amount").and_then(|v| v.as_f64());
    let contracted = details.get("contracted_rate").and_then(|v| v.as_f64());

    match (claimed, contracted) {
        (Some(claimed), Some(contracted)) if claimed > contracted => vec![ClaimCorrection {
            field_path: "total_amount".to_string(),
            old_value: serde_json::json!(claimed),
            new_value: serde_json::json!(contracted),
            reason: "Adjusted to contracted rate".to_string(),
            confidence: 0.98,
        }],
        _ => Vec::new(),
    }
}

async fn correct_authorization(claim: &Value, refdata: &dyn ReferenceData) -> Vec<ClaimCorrection> {
    let Some(patient_id) = str_field(claim, "patient_id") else {
        return Vec::new();
    };
    let service_date = str_field(claim, "service_date");

    match refdata.authorization_for(patient_id, service_date).await {
        Some(auth) => vec![ClaimCorrection {
            field_path: "authorization_number".to_string(),
            old_value: claim
                .get("authorization_number")
                .cloned()
                .unwrap_or(Value::Null),
            new_value: Value::String(auth),
            reason: "Corrected authorization number".to_string(),
            confidence: 0.95,
        }],
        None => Vec::new(),
    }
}

async fn correct_patient_info(
    claim: &Value,
    details: &Value,
    refdata: &dyn ReferenceData,
) -> Vec<ClaimCorrection> {
    let Some(patient_id) = str_field(claim, "patient_id") else {
        return Vec::new();
    };
    let patient = refdata.patient_details(patient_id).await;

    str_list(details, "missing_patient_fields")
        .into_iter()
        .filter_map(|field| {
            patient.get(&field).map(|value| ClaimCorrection {
                field_path: format!("patient.{}", field),
                old_value: Value::Null,
                new_value: value.clone(),
                reason: "Populated from patient records".to_string(),
                confidence: 0.93,
            })
        })
        .collect()
}

async fn correct_provider_info(
    claim: &Value,
    details: &Value,
    refdata: &dyn ReferenceData,
) -> Vec<ClaimCorrection> {
    let Some(provider_id) = str_field(claim, "provider_id") else {
        return Vec::new();
    };
    let provider = refdata.provider_details(provider_id).await;

    str_list(details, "missing_provider_fields")
        .into_iter()
        .filter_map(|field| {
            provider.get(&field).map(|value| ClaimCorrection {
                field_path: format!("provider.{}", field),
                old_value: Value::Null,
                new_value: value.clone(),
                reason: "Populated from provider records".to_string(),
                confidence: 0.95,
            })
        })
        .collect()
}

/// Set a dotted path in a JSON object, creating intermediate objects
fn set_path(root: &mut Value, path: &str, new_value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();

    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            if let Value::Object(map) = current {
                map.insert(part.to_string(), new_value);
            }
            return;
        }

        let Value::Object(map) = current else {
            return;
        };
        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        current = entry;
    }
}

/// Apply corrections to a deep copy of the claim.
///
/// Corrections below [`APPLY_CONFIDENCE_FLOOR`] are skipped. Applying an
/// empty set returns the claim unchanged.
pub fn apply_corrections(claim: &Value, corrections: &[ClaimCorrection]) -> Value {
    let mut corrected = claim.clone();

    for correction in corrections {
        if correction.confidence < APPLY_CONFIDENCE_FLOOR {
            warn!(
                "Skipping low-confidence correction ({:.2}) for {}",
                correction.confidence, correction.field_path
            );
            continue;
        }

        set_path(&mut corrected, &correction.field_path, correction.new_value.clone());
        info!(
            "Applied correction: {} = {} ({})",
            correction.field_path, correction.new_value, correction.reason
        );
    }

    corrected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct FixtureReferenceData {
        diagnosis: HashMap<String, String>,
        patient_fields: serde_json::Map<String, Value>,
        authorization: Option<String>,
    }

    impl FixtureReferenceData {
        fn new() -> Self {
            let mut diagnosis = HashMap::new();
            diagnosis.insert("BAD-DX".to_string(), "E11.9".to_string());
            let mut patient_fields = serde_json::Map::new();
            patient_fields.insert("nationality".to_string(), json!("SA"));
            patient_fields.insert("date_of_birth".to_string(), json!("1980-02-01"));
            FixtureReferenceData {
                diagnosis,
                patient_fields,
                authorization: Some("AUTH-2026".to_string()),
            }
        }
    }

    #[async_trait]
    impl ReferenceData for FixtureReferenceData {
        async fn field_value(&self, _claim: &Value, field: &str) -> Option<Value> {
            (field == "member_id").then(|| json!("M-100"))
        }
        async fn map_diagnosis_code(&self, code: &str) -> Option<String> {
            self.diagnosis.get(code).cloned()
        }
        async fn map_procedure_code(&self, _code: &str) -> Option<String> {
            None
        }
        async fn authorization_for(&self, _p: &str, _d: Option<&str>) -> Option<String> {
            self.authorization.clone()
        }
        async fn patient_details(&self, _patient_id: &str) -> serde_json::Map<String, Value> {
            self.patient_fields.clone()
        }
        async fn provider_details(&self, _provider_id: &str) -> serde_json::Map<String, Value> {
            serde_json::Map::new()
        }
    }

    #[tokio::test]
    async fn pricing_correction_clamps_to_contracted_rate() {
        let claim = json!({"total_amount": 500.0});
        let details = json!({"contracted_rate": 400.0});

        let corrections =
            analyze_rejection(&claim, "PR01", &details, &EmptyReferenceData).await;

        assert_eq!(corrections.len(), 1);
        let c = &corrections[0];
        assert_eq!(c.field_path, "total_amount");
        assert_eq!(c.old_value, json!(500.0));
        assert_eq!(c.new_value, json!(400.0));
        assert_eq!(c.confidence, 0.98);
    }

    #[tokio::test]
    async fn pricing_below_contracted_rate_needs_no_correction() {
        let claim = json!({"total_amount": 300.0});
        let details = json!({"contracted_rate": 400.0});
        let corrections =
            analyze_rejection(&claim, "PR01", &details, &EmptyReferenceData).await;
        assert!(corrections.is_empty());
    }

    #[tokio::test]
    async fn diagnosis_mapping_uses_reference_data() {
        let claim = json!({});
        let details = json!({"invalid_diagnosis_code": "BAD-DX"});
        let corrections =
            analyze_rejection(&claim, "CD01", &details, &FixtureReferenceData::new()).await;

        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].new_value, json!("E11.9"));
        assert_eq!(corrections[0].confidence, 0.85);
    }

    #[tokio::test]
    async fn patient_info_populates_listed_subfields() {
        let claim = json!({"patient_id": "p1"});
        let details = json!({"missing_patient_fields": ["nationality", "blood_type"]});
        let corrections =
            analyze_rejection(&claim, "INC01", &details, &FixtureReferenceData::new()).await;

        // blood_type is absent from the master record
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].field_path, "patient.nationality");
        assert_eq!(corrections[0].confidence, 0.93);
    }

    #[tokio::test]
    async fn authorization_lookup_by_patient_and_date() {
        let claim = json!({"patient_id": "p1", "service_date": "2026-07-01", "authorization_number": "OLD"});
        let corrections =
            analyze_rejection(&claim, "PA03", &json!({}), &FixtureReferenceData::new()).await;

        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].old_value, json!("OLD"));
        assert_eq!(corrections[0].new_value, json!("AUTH-2026"));
    }

    #[tokio::test]
    async fn unknown_code_yields_no_corrections() {
        let corrections =
            analyze_rejection(&json!({}), "NOPE", &json!({}), &EmptyReferenceData).await;
        assert!(corrections.is_empty());
    }

    #[test]
    fn apply_creates_intermediate_maps() {
        let claim = json!({"patient_id": "p1"});
        let corrections = vec![ClaimCorrection {
            field_path: "patient.address.city".to_string(),
            old_value: Value::Null,
            new_value: json!("Riyadh"),
            reason: "test".to_string(),
            confidence: 0.9,
        }];

        let corrected = apply_corrections(&claim, &corrections);
        assert_eq!(corrected["patient"]["address"]["city"], "Riyadh");
        assert_eq!(corrected["patient_id"], "p1");
    }

    #[test]
    fn apply_skips_low_confidence() {
        let claim = json!({"total_amount": 500.0});
        let corrections = vec![ClaimCorrection {
            field_path: "total_amount".to_string(),
            old_value: json!(500.0),
            new_value: json!(1.0),
            reason: "too speculative".to_string(),
            confidence: 0.5,
        }];

        let corrected = apply_corrections(&claim, &corrections);
        assert_eq!(corrected["total_amount"], 500.0);
    }

    #[test]
    fn apply_empty_set_is_identity() {
        let claim = json!({"a": {"b": 1}, "total_amount": 42.0});
        let corrected = apply_corrections(&claim, &[]);
        assert_eq!(corrected, claim);
    }
}
