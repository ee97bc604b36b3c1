//! FHIR resource assembly for the NPHIES boundary
//!
//! The resources built here are opaque to the orchestrator; only the
//! fields NPHIES requires at the boundary are populated.

use chrono::{NaiveDate, Utc};
use claims_common::{ClaimItem, ClaimRequest};
use serde_json::{json, Value};

const CLAIM_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/claim-type";
const CURRENCY: &str = "SAR";

fn serviced_date(item: &ClaimItem, claim: &ClaimRequest) -> String {
    item.service_date
        .or(claim.service_date)
        .unwrap_or_else(|| Utc::now().date_naive())
        .to_string()
}

fn claim_items(claim: &ClaimRequest) -> Vec<Value> {
    claim
        .items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            json!({
                "sequence": idx + 1,
                "productOrService": {
                    "coding": [{
                        "code": item.code,
                        "display": item.description,
                    }]
                },
                "servicedDate": serviced_date(item, claim),
                "quantity": { "value": item.quantity },
                "unitPrice": { "value": item.unit_price, "currency": CURRENCY },
                "net": { "value": item.net(), "currency": CURRENCY },
            })
        })
        .collect()
}

fn insurance(claim: &ClaimRequest) -> Value {
    json!([{
        "sequence": 1,
        "focal": true,
        "coverage": { "reference": format!("Coverage/{}", claim.insurance_id) },
    }])
}

/// FHIR Claim resource for submission
pub fn claim_resource(claim: &ClaimRequest, organization_id: &str) -> Value {
    json!({
        "resourceType": "Claim",
        "status": "active",
        "type": {
            "coding": [{
                "system": CLAIM_TYPE_SYSTEM,
                "code": claim.claim_type.as_code(),
            }]
        },
        "use": "claim",
        "patient": { "reference": format!("Patient/{}", claim.patient_id) },
        "created": Utc::now().to_rfc3339(),
        "provider": { "reference": format!("Organization/{}", organization_id) },
        "priority": { "coding": [{ "code": "normal" }] },
        "insurance": insurance(claim),
        "item": claim_items(claim),
        "total": { "value": claim.total_amount, "currency": CURRENCY },
    })
}

/// FHIR Claim resource with `use = preauthorization`
pub fn prior_authorization_resource(claim: &ClaimRequest, organization_id: &str) -> Value {
    let mut resource = claim_resource(claim, organization_id);
    resource["use"] = json!("preauthorization");
    resource
}

/// FHIR CoverageEligibilityRequest
pub fn eligibility_resource(
    patient_id: &str,
    insurance_id: &str,
    service_date: Option<NaiveDate>,
    organization_id: &str,
) -> Value {
    json!({
        "resourceType": "CoverageEligibilityRequest",
        "status": "active",
        "purpose": ["validation"],
        "patient": { "reference": format!("Patient/{}", patient_id) },
        "servicedDate": service_date.unwrap_or_else(|| Utc::now().date_naive()).to_string(),
        "insurance": [{
            "coverage": { "reference": format!("Coverage/{}", insurance_id) },
        }],
        "provider": { "reference": format!("Organization/{}", organization_id) },
    })
}

/// FHIR Communication attached to a claim
pub fn communication_resource(claim_id: &str, message: &str, attachments: &[Value]) -> Value {
    let mut payload = vec![json!({ "contentString": message })];
    payload.extend(
        attachments
            .iter()
            .map(|a| json!({ "contentAttachment": a })),
    );

    json!({
        "resourceType": "Communication",
        "status": "completed",
        "category": [{ "coding": [{ "code": "claim-attachment" }] }],
        "about": [{ "reference": format!("Claim/{}", claim_id) }],
        "payload": payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims_common::ClaimType;

    fn sample_claim() -> ClaimRequest {
        ClaimRequest {
            patient_id: "p1".to_string(),
            member_id: "m1".to_string(),
            payer_id: "7000911508".to_string(),
            service_date: NaiveDate::from_ymd_opt(2026, 7, 1),
            items: vec![
                ClaimItem {
                    code: "99213".to_string(),
                    description: Some("Office visit".to_string()),
                    quantity: 2.0,
                    unit_price: 75.0,
                    service_date: None,
                },
                ClaimItem {
                    code: "85025".to_string(),
                    description: None,
                    quantity: 1.0,
                    unit_price: 40.0,
                    service_date: NaiveDate::from_ymd_opt(2026, 7, 2),
                },
            ],
            claim_type: ClaimType::Professional,
            total_amount: 190.0,
            insurance_id: "NPHIES-X".to_string(),
            prior_auth_ref: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn claim_resource_shape() {
        let resource = claim_resource(&sample_claim(), "10000000000988");

        assert_eq!(resource["resourceType"], "Claim");
        assert_eq!(resource["use"], "claim");
        assert_eq!(resource["type"]["coding"][0]["code"], "professional");
        assert_eq!(resource["patient"]["reference"], "Patient/p1");
        assert_eq!(resource["provider"]["reference"], "Organization/10000000000988");
        assert_eq!(resource["insurance"][0]["coverage"]["reference"], "Coverage/NPHIES-X");

        let items = resource["item"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["sequence"], 1);
        assert_eq!(items[0]["servicedDate"], "2026-07-01");
        assert_eq!(items[0]["net"]["value"], 150.0);
        assert_eq!(items[0]["net"]["currency"], "SAR");
        assert_eq!(items[1]["sequence"], 2);
        assert_eq!(items[1]["servicedDate"], "2026-07-02");
    }

    #[test]
    fn prior_authorization_sets_use() {
        let resource = prior_authorization_resource(&sample_claim(), "10000000000988");
        assert_eq!(resource["use"], "preauthorization");
        assert_eq!(resource["resourceType"], "Claim");
    }

    #[test]
    fn eligibility_resource_shape() {
        let resource = eligibility_resource("p1", "INS-9", NaiveDate::from_ymd_opt(2026, 6, 15), "org-1");
        assert_eq!(resource["resourceType"], "CoverageEligibilityRequest");
        assert_eq!(resource["purpose"][0], "validation");
        assert_eq!(resource["servicedDate"], "2026-06-15");
        assert_eq!(resource["insurance"][0]["coverage"]["reference"], "Coverage/INS-9");
    }

    #[test]
    fn communication_appends_attachments() {
        let attachment = json!({"contentType": "application/pdf", "title": "report"});
        let resource = communication_resource("c-1", "please review", &[attachment]);
        let payload = resource["payload"].as_array().unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0]["contentString"], "please review");
        assert_eq!(payload[1]["contentAttachment"]["title"], "report");
    }
}
