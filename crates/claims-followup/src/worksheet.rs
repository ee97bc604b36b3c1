//! Worksheet parsing and normalization
//!
//! The daily follow-up worksheet arrives as a CSV export with hand-typed
//! headers, branch spellings, status labels, placeholder cells, and a mix
//! of ISO, regional, and Excel-serial dates. Everything here is lenient:
//! unparseable cells become `None`, unknown branches drop the row.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

static BRANCH_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("riyad", "riyadh"),
        ("jazan", "jizan"),
        ("madina", "madinah"),
        ("medina", "madinah"),
        ("medinah", "madinah"),
        ("khamismushait", "khamis"),
        ("onizah", "unizah"),
        ("onaiza", "unizah"),
        ("onaizah", "unizah"),
    ])
});

static BRANCH_DISPLAY: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("riyadh", "Riyadh"),
        ("jizan", "Jizan"),
        ("madinah", "Madinah"),
        ("khamis", "Khamis Mushait"),
        ("unizah", "Unaizah"),
        ("abha", "Abha"),
        ("makkah", "Makkah"),
    ])
});

/// Header variants that do not slugify cleanly, mapped to canonical
/// slugs; `None` drops the column.
static SPECIAL_HEADERS: Lazy<HashMap<&'static str, Option<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("initial rejection %", Some("initial_rejection_percent")),
        ("final rejection %", Some("final_rejection_percent")),
        ("re-submission date", Some("resubmission_date")),
        ("batch status", Some("status")),
        ("final rejection", Some("final_rejection_amount")),
        ("column1", None),
        ("column44", None),
    ])
});

/// Canonical batch status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Submitted,
    NoRejection,
    PassedDue,
    ReadyToWork,
    UnderProcessing,
    NotSubmitted,
    Unknown,
}

impl BatchStatus {
    pub fn display(&self) -> &'static str {
        match self {
            BatchStatus::Submitted => "Submitted",
            BatchStatus::NoRejection => "No Rejection",
            BatchStatus::PassedDue => "Passed Due",
            BatchStatus::ReadyToWork => "Ready To Work",
            BatchStatus::UnderProcessing => "Under Processing",
            BatchStatus::NotSubmitted => "Not Submitted",
            BatchStatus::Unknown => "Needs Review",
        }
    }
}

/// Normalized worksheet row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpRow {
    pub branch_key: String,
    pub branch: String,
    pub status: BatchStatus,
    pub status_raw: Option<String>,
    pub insurance_company: String,
    pub batch_no: Option<String>,
    pub processor: Option<String>,
    pub rework_type: Option<String>,
    pub batch_type: Option<String>,
    pub billing_month: Option<String>,
    pub year: Option<i32>,
    pub due_date: Option<NaiveDate>,
    pub received_date: Option<NaiveDate>,
    pub resubmission_date: Option<NaiveDate>,
    pub days_to_due: Option<i64>,
    pub billing_amount: Option<f64>,
    pub approved_to_pay: Option<f64>,
    pub final_rejection_amount: Option<f64>,
    pub final_rejection_percent: Option<f64>,
    pub recovery_amount: Option<f64>,
}

/// Canonical branch slug for a raw branch cell
pub fn normalize_branch(value: &str) -> Option<String> {
    let token: String = value
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase();
    if token.is_empty() {
        return None;
    }
    if let Some(canonical) = BRANCH_ALIASES.get(token.as_str()) {
        return Some(canonical.to_string());
    }
    if BRANCH_DISPLAY.contains_key(token.as_str()) {
        return Some(token);
    }
    None
}

/// Human-readable branch label
pub fn branch_display(branch: &str) -> String {
    BRANCH_DISPLAY
        .get(branch)
        .map(|s| s.to_string())
        .unwrap_or_else(|| branch.replace('_', " "))
}

/// Canonical status via alias table and substring heuristics
pub fn normalize_status(value: Option<&str>) -> BatchStatus {
    let Some(value) = value else {
        return BatchStatus::Unknown;
    };
    let text = value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if text.is_empty() {
        return BatchStatus::Unknown;
    }

    match text.as_str() {
        "submitted" | "submited" | "submitted-" => return BatchStatus::Submitted,
        "no rejection" | "no_rejection" => return BatchStatus::NoRejection,
        "passed due" => return BatchStatus::PassedDue,
        "ready to work" | "ready for work" => return BatchStatus::ReadyToWork,
        "under processing" | "underprocess" => return BatchStatus::UnderProcessing,
        "not submitted" | "not submit" => return BatchStatus::NotSubmitted,
        _ => {}
    }

    if text.contains("pass") && text.contains("due") {
        BatchStatus::PassedDue
    } else if text.contains("ready") {
        BatchStatus::ReadyToWork
    } else if text.contains("not") && text.contains("submit") {
        BatchStatus::NotSubmitted
    } else if text.contains("under") && text.contains("process") {
        BatchStatus::UnderProcessing
    } else if text.contains("submit") {
        BatchStatus::Submitted
    } else if text.contains("no") && text.contains("rejection") {
        BatchStatus::NoRejection
    } else {
        BatchStatus::Unknown
    }
}

/// Trimmed cell content; blanks and placeholder dashes become `None`
pub fn clean_string(value: &str) -> Option<String> {
    let cleaned = value.trim();
    if cleaned.is_empty() || matches!(cleaned, "-" | "--" | "\u{2014}" | "_") {
        return None;
    }
    Some(cleaned.to_string())
}

/// Lenient numeric parse: strips commas, ignores placeholders and
/// anything that still looks like a formula.
pub fn parse_float(value: &str) -> Option<f64> {
    let cleaned = value.trim();
    if cleaned.is_empty() || cleaned == "-" || cleaned == "--" || cleaned.starts_with('=') {
        return None;
    }
    cleaned.replace(',', "").parse().ok()
}

/// Parse a worksheet date: ISO and regional formats, or an Excel serial
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let cleaned = value.trim();
    if cleaned.is_empty() || cleaned == "-" || cleaned == "--" {
        return None;
    }

    for format in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return guard_bogus(date);
        }
    }

    // Excel serial dates count from 1899-12-30
    if let Ok(serial) = cleaned.parse::<f64>() {
        if serial <= 0.0 {
            return None;
        }
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
        return guard_bogus(epoch + Duration::days(serial as i64));
    }

    None
}

/// Guard against bogus Excel defaults such as 1900-01-22
fn guard_bogus(date: NaiveDate) -> Option<NaiveDate> {
    use chrono::Datelike;
    (date.year() >= 1905).then_some(date)
}

pub fn format_currency(value: Option<f64>) -> String {
    match value {
        None => "\u{2014}".to_string(),
        Some(value) => {
            let negative = value < 0.0;
            let cents = format!("{:.2}", value.abs());
            let (whole, frac) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));

            let mut grouped = String::new();
            for (idx, c) in whole.chars().rev().enumerate() {
                if idx > 0 && idx % 3 == 0 {
                    grouped.push(',');
                }
                grouped.push(c);
            }
            let whole: String = grouped.chars().rev().collect();

            format!("SAR {}{}.{}", if negative { "-" } else { "" }, whole, frac)
        }
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    match value {
        None => "\u{2014}".to_string(),
        Some(value) if value <= 1.0 => format!("{:.1}%", value * 100.0),
        Some(value) => format!("{:.1}%", value),
    }
}

pub fn format_date(value: Option<NaiveDate>) -> String {
    match value {
        None => "Not provided".to_string(),
        Some(date) => date.to_string(),
    }
}

/// Slugify raw worksheet headers, applying the variant map and
/// suffixing duplicate columns.
pub fn sanitize_headers(raw_headers: &csv::StringRecord) -> Vec<Option<String>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(raw_headers.len());

    for raw in raw_headers.iter() {
        let key = raw.trim().to_lowercase();
        let token = match SPECIAL_HEADERS.get(key.as_str()) {
            Some(Some(mapped)) => Some(mapped.to_string()),
            Some(None) => None,
            None => {
                let slug: String = key
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect::<String>()
                    .split('_')
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("_");
                (!slug.is_empty()).then_some(slug)
            }
        };

        match token {
            None => headers.push(None),
            Some(base) => {
                let mut token = base.clone();
                let mut counter = 2;
                while seen.contains(&token) {
                    token = format!("{}_{}", base, counter);
                    counter += 1;
                }
                seen.insert(token.clone());
                headers.push(Some(token));
            }
        }
    }

    headers
}

/// Normalize one raw row into a [`FollowUpRow`]. Rows with an
/// unrecognized branch are dropped.
pub fn normalize_row(row: &HashMap<String, String>, today: NaiveDate) -> Option<FollowUpRow> {
    let branch_key = normalize_branch(row.get("branch")?)?;

    let status_raw = row.get("status").and_then(|v| clean_string(v));
    let status = normalize_status(status_raw.as_deref());

    let get_date = |key: &str| row.get(key).and_then(|v| parse_date(v));
    let get_float = |key: &str| row.get(key).and_then(|v| parse_float(v));
    let get_string = |key: &str| row.get(key).and_then(|v| clean_string(v));

    let due_date = get_date("due_date");
    let days_to_due = due_date.map(|due| (due - today).num_days());

    let year = row.get("year").and_then(|v| {
        let v = v.trim();
        v.parse::<i32>().ok().or_else(|| v.parse::<f64>().ok().map(|f| f as i32))
    });

    Some(FollowUpRow {
        branch: branch_display(&branch_key),
        branch_key,
        status,
        status_raw,
        insurance_company: get_string("insurance_company").unwrap_or_else(|| "Unknown".to_string()),
        batch_no: get_string("batch_no"),
        processor: get_string("processor"),
        rework_type: get_string("rework_type"),
        batch_type: get_string("batch_type"),
        billing_month: get_string("month"),
        year,
        due_date,
        received_date: get_date("received_date"),
        resubmission_date: get_date("resubmission_date"),
        days_to_due,
        billing_amount: get_float("billing_amount"),
        approved_to_pay: get_float("approved_to_pay"),
        final_rejection_amount: get_float("final_rejection_amount"),
        final_rejection_percent: get_float("final_rejection_percent"),
        recovery_amount: get_float("recovery_amount"),
    })
}
