//! Static rejection-code catalog
//!
//! Derived from historical RCM rejection data. The table is immutable
//! after process initialization; queries never lock.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity of a rejection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionSeverity {
    /// Requires immediate action
    Critical,
    /// Address within 24 hours
    High,
    /// Address within 72 hours
    Medium,
    /// Regular workflow
    Low,
}

/// Category of a rejection reason
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    Eligibility,
    Authorization,
    Documentation,
    Coding,
    Pricing,
    Duplicate,
    Policy,
    Technical,
    Incomplete,
}

/// Metadata for one standardized rejection code
#[derive(Debug, Clone, Serialize)]
pub struct RejectionCodeEntry {
    pub code: &'static str,
    pub description: &'static str,
    pub category: RejectionCategory,
    pub severity: RejectionSeverity,
    pub auto_resubmit: bool,
    pub required_action: &'static str,
    pub estimated_resolution: &'static str,
    /// Expected success rate after correction, 0.0 to 1.0
    pub success_rate_after_correction: f64,
}

/// Process-wide catalog of rejection codes and payer mappings
pub struct RejectionCatalog {
    codes: HashMap<&'static str, RejectionCodeEntry>,
    /// (payer, payer account id) -> payer code -> standard code
    payer_maps: HashMap<(&'static str, &'static str), HashMap<&'static str, &'static str>>,
}

macro_rules! entry {
    ($code:literal, $desc:literal, $cat:ident, $sev:ident, $auto:literal, $action:literal, $eta:literal, $rate:literal) => {
        (
            $code,
            RejectionCodeEntry {
                code: $code,
                description: $desc,
                category: RejectionCategory::$cat,
                severity: RejectionSeverity::$sev,
                auto_resubmit: $auto,
                required_action: $action,
                estimated_resolution: $eta,
                success_rate_after_correction: $rate,
            },
        )
    };
}

static CATALOG: Lazy<RejectionCatalog> = Lazy::new(|| {
    let codes = HashMap::from([
        // Eligibility
        entry!("EB01", "Member not eligible on service date", Eligibility, High, false,
            "Verify member eligibility date and update claim", "4 hours", 0.85),
        entry!("EB02", "Policy terminated or inactive", Eligibility, Critical, false,
            "Contact payer to verify policy status", "1 day", 0.40),
        entry!("EB03", "Service not covered under policy", Eligibility, Medium, false,
            "Review policy benefits and submit appeal if applicable", "2 days", 0.35),
        // Authorization
        entry!("PA01", "Prior authorization required", Authorization, High, false,
            "Obtain prior authorization and resubmit", "3 days", 0.90),
        entry!("PA02", "Prior authorization expired", Authorization, High, false,
            "Request authorization extension or new authorization", "2 days", 0.75),
        entry!("PA03", "Authorization number invalid", Authorization, Medium, true,
            "Verify and correct authorization number", "2 hours", 0.95),
        // Documentation
        entry!("DOC01", "Missing required documentation", Documentation, High, false,
            "Attach required documents and resubmit", "1 day", 0.88),
        entry!("DOC02", "Medical report incomplete", Documentation, Medium, false,
            "Complete medical report and resubmit", "1 day", 0.82),
        // Coding
        entry!("CD01", "Invalid diagnosis code", Coding, Medium, true,
            "Correct ICD-10 code and resubmit", "2 hours", 0.92),
        entry!("CD02", "Invalid procedure code", Coding, Medium, true,
            "Correct CPT/ICD-9-CM code and resubmit", "2 hours", 0.90),
        entry!("CD03", "Diagnosis and procedure mismatch", Coding, Medium, false,
            "Review and correct code relationship", "4 hours", 0.78),
        entry!("CD04", "NCCI edit conflict", Coding, Medium, true,
            "Remove conflicting code or add modifier", "2 hours", 0.85),
        // Pricing
        entry!("PR01", "Price exceeds contracted rate", Pricing, Medium, true,
            "Adjust to contracted rate and resubmit", "1 hour", 0.98),
        entry!("PR02", "Service not in price list", Pricing, High, false,
            "Request rate negotiation or price list update", "5 days", 0.45),
        // Duplicates
        entry!("DUP01", "Duplicate claim submission", Duplicate, Low, false,
            "Verify claim status, void if duplicate", "1 hour", 0.10),
        // Policy
        entry!("POL01", "Service exceeds policy limits", Policy, Medium, false,
            "Review policy limits and submit appeal if applicable", "3 days", 0.30),
        entry!("POL02", "Per diem limit exceeded", Policy, Medium, false,
            "Review per diem agreement and adjust claim", "1 day", 0.65),
        // Technical
        entry!("TECH01", "Invalid data format", Technical, High, true,
            "Fix data format and resubmit automatically", "30 minutes", 0.99),
        entry!("TECH02", "Missing required field", Technical, High, true,
            "Add missing field and resubmit", "1 hour", 0.97),
        // Incomplete information
        entry!("INC01", "Missing patient information", Incomplete, High, true,
            "Complete patient information and resubmit", "2 hours", 0.93),
        entry!("INC02", "Missing provider information", Incomplete, High, true,
            "Complete provider information and resubmit", "1 hour", 0.95),
    ]);

    let payer_maps = HashMap::from([
        (
            ("TAWUNIYA", "7000911508"),
            HashMap::from([
                ("ERR_001", "EB01"),
                ("ERR_002", "PA01"),
                ("ERR_003", "DOC01"),
                ("ERR_004", "CD01"),
                ("ERR_005", "PR01"),
            ]),
        ),
        (
            ("BUPA", "7001003602"),
            HashMap::from([
                ("BUPA_ELG", "EB01"),
                ("BUPA_AUTH", "PA01"),
                ("BUPA_DOC", "DOC01"),
                ("BUPA_CODE", "CD01"),
                ("BUPA_PRICE", "PR01"),
            ]),
        ),
        (
            ("NCCI", "INS-809"),
            HashMap::from([
                ("NCCI_001", "EB01"),
                ("NCCI_002", "PA01"),
                ("NCCI_EDIT", "CD04"),
                ("NCCI_PRICE", "PR01"),
            ]),
        ),
        (
            ("MOH", "MOH-001"),
            HashMap::from([
                ("MOH_ELG", "EB01"),
                ("MOH_AUTH", "PA01"),
                ("MOH_PERDIEM", "POL02"),
            ]),
        ),
    ]);

    RejectionCatalog { codes, payer_maps }
});

/// Access the process-wide catalog
pub fn catalog() -> &'static RejectionCatalog {
    &CATALOG
}

impl RejectionCatalog {
    pub fn get(&self, code: &str) -> Option<&RejectionCodeEntry> {
        self.codes.get(code)
    }

    /// Whether the code permits automatic resubmission.
    /// Unknown codes never auto-resubmit.
    pub fn auto_resubmittable(&self, code: &str) -> bool {
        self.get(code).map(|e| e.auto_resubmit).unwrap_or(false)
    }

    pub fn auto_resubmit_codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<_> = self
            .codes
            .values()
            .filter(|e| e.auto_resubmit)
            .map(|e| e.code)
            .collect();
        codes.sort();
        codes
    }

    pub fn codes_by_category(&self, category: RejectionCategory) -> Vec<&'static str> {
        let mut codes: Vec<_> = self
            .codes
            .values()
            .filter(|e| e.category == category)
            .map(|e| e.code)
            .collect();
        codes.sort();
        codes
    }

    pub fn codes_by_severity(&self, severity: RejectionSeverity) -> Vec<&'static str> {
        let mut codes: Vec<_> = self
            .codes
            .values()
            .filter(|e| e.severity == severity)
            .map(|e| e.code)
            .collect();
        codes.sort();
        codes
    }

    /// Codes whose expected post-correction success rate meets the threshold
    pub fn codes_with_success_rate(&self, threshold: f64) -> Vec<&'static str> {
        let mut codes: Vec<_> = self
            .codes
            .values()
            .filter(|e| e.success_rate_after_correction >= threshold)
            .map(|e| e.code)
            .collect();
        codes.sort();
        codes
    }

    /// Map a payer-specific rejection code to a standard code
    pub fn map_payer_code(
        &self,
        payer: &str,
        payer_account: &str,
        payer_code: &str,
    ) -> Option<&'static str> {
        self.payer_maps
            .get(&(payer, payer_account))
            .and_then(|m| m.get(payer_code))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_code() {
        let entry = catalog().get("PR01").unwrap();
        assert_eq!(entry.category, RejectionCategory::Pricing);
        assert_eq!(entry.severity, RejectionSeverity::Medium);
        assert!(entry.auto_resubmit);
        assert_eq!(entry.success_rate_after_correction, 0.98);
    }

    #[test]
    fn auto_resubmittable_implies_catalog_flag() {
        for code in catalog().auto_resubmit_codes() {
            assert!(catalog().get(code).unwrap().auto_resubmit);
            assert!(catalog().auto_resubmittable(code));
        }
        assert!(!catalog().auto_resubmittable("EB02"));
        assert!(!catalog().auto_resubmittable("UNKNOWN"));
    }

    #[test]
    fn category_and_severity_queries() {
        assert_eq!(
            catalog().codes_by_category(RejectionCategory::Coding),
            vec!["CD01", "CD02", "CD03", "CD04"]
        );
        assert!(catalog()
            .codes_by_severity(RejectionSeverity::Critical)
            .contains(&"EB02"));
    }

    #[test]
    fn success_rate_threshold_query() {
        let high = catalog().codes_with_success_rate(0.95);
        assert!(high.contains(&"PR01"));
        assert!(high.contains(&"TECH01"));
        assert!(!high.contains(&"EB02"));
    }

    #[test]
    fn payer_code_mapping() {
        assert_eq!(
            catalog().map_payer_code("TAWUNIYA", "7000911508", "ERR_005"),
            Some("PR01")
        );
        assert_eq!(
            catalog().map_payer_code("BUPA", "7001003602", "BUPA_AUTH"),
            Some("PA01")
        );
        assert_eq!(catalog().map_payer_code("BUPA", "wrong-account", "BUPA_AUTH"), None);
        assert_eq!(catalog().map_payer_code("UNKNOWN", "x", "y"), None);
    }
}
