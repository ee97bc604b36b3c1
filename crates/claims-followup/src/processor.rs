//! Follow-up alert generation
//!
//! Scans the normalized worksheet rows, accumulates human-readable
//! alerts, assigns priority and stakeholders, and emits one event per
//! row that needs attention.

use crate::worksheet::{
    format_currency, format_date, format_percent, normalize_row, sanitize_headers, BatchStatus,
    FollowUpRow,
};
use chrono::{NaiveDate, Utc};
use claims_common::utils::{short_uid, slugify};
use claims_common::{Error, Result};
use claims_notify::{EventType, NotificationPriority, StakeholderGroup, TeamsEvent};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DUE_SOON_THRESHOLD_DAYS: i64 = 2;
const CRITICAL_OVERDUE_THRESHOLD_DAYS: i64 = 3;
const HIGH_REJECTION_AMOUNT: f64 = 250_000.0;
const MEDIUM_REJECTION_AMOUNT: f64 = 100_000.0;
const COMPLIANCE_PERCENT_THRESHOLD: f64 = 0.05;

/// Per-row alert context, also exposed to analytics consumers
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub should_alert: bool,
    pub priority: NotificationPriority,
    pub stakeholders: Vec<StakeholderGroup>,
    pub correlation_id: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub row: FollowUpRow,
}

/// Converts the operations worksheet into prioritized events
pub struct WorksheetProcessor {
    worksheet_path: PathBuf,
    today: NaiveDate,
}

impl WorksheetProcessor {
    pub fn new(worksheet_path: impl Into<PathBuf>) -> Self {
        WorksheetProcessor {
            worksheet_path: worksheet_path.into(),
            today: Utc::now().date_naive(),
        }
    }

    /// Pin "today" for deterministic processing
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Parse the worksheet and produce one event per alerted row
    pub fn generate_events(&self) -> Result<Vec<TeamsEvent>> {
        let contexts = self.collect_contexts(false)?;
        info!(
            "Worksheet scan produced {} alerts from {}",
            contexts.len(),
            self.worksheet_path.display()
        );
        contexts.into_iter().map(|c| self.build_event(c)).collect()
    }

    /// Per-row alert contexts; `include_non_alerts` keeps quiet rows too
    pub fn collect_contexts(&self, include_non_alerts: bool) -> Result<Vec<AlertContext>> {
        let rows = self.load_rows(&self.worksheet_path)?;

        let mut contexts = Vec::new();
        for row in rows {
            let Some(normalized) = normalize_row(&row, self.today) else {
                continue;
            };
            let context = self.build_alert_context(normalized);
            if include_non_alerts || context.should_alert {
                contexts.push(context);
            }
        }
        Ok(contexts)
    }

    fn load_rows(&self, path: &Path) -> Result<Vec<HashMap<String, String>>> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            Error::Configuration(format!("cannot open worksheet {}: {}", path.display(), e))
        })?;

        let headers = sanitize_headers(
            reader
                .headers()
                .map_err(|e| Error::Validation(format!("worksheet has no header row: {}", e)))?,
        );

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| Error::Validation(format!("unreadable worksheet row: {}", e)))?;

            let mut row = HashMap::new();
            let mut empty = true;
            for (idx, header) in headers.iter().enumerate() {
                let Some(header) = header else { continue };
                let value = record.get(idx).unwrap_or("").to_string();
                if !value.trim().is_empty() {
                    empty = false;
                }
                row.insert(header.clone(), value);
            }
            if !empty {
                rows.push(row);
            }
        }

        debug!("Loaded {} worksheet rows", rows.len());
        Ok(rows)
    }

    fn build_alert_context(&self, row: FollowUpRow) -> AlertContext {
        let mut alerts: Vec<String> = Vec::new();
        let mut add_alert = |alerts: &mut Vec<String>, message: String| {
            if !alerts.contains(&message) {
                alerts.push(message);
            }
        };

        let final_rejection_amount = row.final_rejection_amount.unwrap_or(0.0);
        let recovery_amount = row.recovery_amount.unwrap_or(0.0);
        let due_soon = matches!(row.days_to_due, Some(d) if (0..=DUE_SOON_THRESHOLD_DAYS).contains(&d));

        if row.status == BatchStatus::PassedDue {
            match (row.due_date, row.days_to_due) {
                (Some(due), Some(days)) => add_alert(
                    &mut alerts,
                    format!(
                        "Marked Passed Due - overdue by {} day(s) (was due {})",
                        days.abs(),
                        format_date(Some(due))
                    ),
                ),
                _ => add_alert(
                    &mut alerts,
                    "Marked Passed Due with missing due date - confirm in worksheet".to_string(),
                ),
            }
        }
        if let Some(days) = row.days_to_due {
            if days < 0 && row.status != BatchStatus::PassedDue {
                add_alert(
                    &mut alerts,
                    format!(
                        "Due date {} passed {} day(s) ago",
                        format_date(row.due_date),
                        days.abs()
                    ),
                );
            } else if (0..=DUE_SOON_THRESHOLD_DAYS).contains(&days) {
                add_alert(
                    &mut alerts,
                    format!("Due in {} day(s) on {}", days, format_date(row.due_date)),
                );
            }
        }
        if row.status == BatchStatus::NotSubmitted {
            add_alert(&mut alerts, "Batch flagged as not submitted".to_string());
        }
        if row.status == BatchStatus::ReadyToWork {
            add_alert(&mut alerts, "Batch ready for rework - assign processor".to_string());
        }
        if row.processor.is_none() {
            add_alert(&mut alerts, "No processor assigned in worksheet".to_string());
        }
        if final_rejection_amount > 0.0 {
            add_alert(
                &mut alerts,
                format!(
                    "Final rejection total {}",
                    format_currency(row.final_rejection_amount)
                ),
            );
        }
        if matches!(row.final_rejection_percent, Some(p) if p >= COMPLIANCE_PERCENT_THRESHOLD) {
            add_alert(
                &mut alerts,
                format!(
                    "Rejection ratio {} exceeds threshold",
                    format_percent(row.final_rejection_percent)
                ),
            );
        }
        if recovery_amount > 0.0 {
            add_alert(
                &mut alerts,
                format!(
                    "Recovery amount outstanding {}",
                    format_currency(row.recovery_amount)
                ),
            );
        }

        let priority = self.assign_priority(&row, final_rejection_amount, due_soon);
        let stakeholders = Self::assign_stakeholders(&row, priority, final_rejection_amount);
        let correlation_id = row
            .batch_no
            .clone()
            .unwrap_or_else(|| self.fallback_correlation_id(&row));

        let mut data = serde_json::Map::new();
        data.insert("branch".to_string(), json!(row.branch.clone()));
        data.insert("status_display".to_string(), json!(row.status.display()));
        data.insert(
            "status_raw".to_string(),
            json!(row.status_raw.clone().unwrap_or_default()),
        );
        data.insert(
            "insurance_company".to_string(),
            json!(row.insurance_company.clone()),
        );
        data.insert("batch_no".to_string(), json!(row.batch_no.clone()));
        data.insert("processor".to_string(), json!(row.processor.clone()));
        data.insert("rework_type".to_string(), json!(row.rework_type.clone()));
        data.insert("batch_type".to_string(), json!(row.batch_type.clone()));
        data.insert("billing_month".to_string(), json!(row.billing_month.clone()));
        data.insert("billing_year".to_string(), json!(row.year));
        data.insert("due_date_display".to_string(), json!(format_date(row.due_date)));
        data.insert(
            "received_date_display".to_string(),
            json!(format_date(row.received_date)),
        );
        data.insert(
            "resubmission_date_display".to_string(),
            json!(format_date(row.resubmission_date)),
        );
        data.insert(
            "billing_amount_display".to_string(),
            json!(format_currency(row.billing_amount)),
        );
        data.insert(
            "approved_to_pay_display".to_string(),
            json!(format_currency(row.approved_to_pay)),
        );
        data.insert(
            "final_rejection_display".to_string(),
            json!(format_currency(row.final_rejection_amount)),
        );
        data.insert(
            "final_rejection_percent_display".to_string(),
            json!(format_percent(row.final_rejection_percent)),
        );
        data.insert(
            "recovery_amount_display".to_string(),
            json!(format_currency(row.recovery_amount)),
        );
        let should_alert = !alerts.is_empty();
        data.insert("alerts_joined".to_string(), json!(alerts.join("\n")));
        data.insert("alerts".to_string(), json!(alerts));
        data.insert("days_until_due".to_string(), json!(row.days_to_due));

        AlertContext {
            should_alert,
            priority,
            stakeholders,
            correlation_id,
            data,
            row,
        }
    }

    /// Priority rules, first match wins
    fn assign_priority(
        &self,
        row: &FollowUpRow,
        final_rejection_amount: f64,
        due_soon: bool,
    ) -> NotificationPriority {
        if let Some(days) = row.days_to_due {
            if days < 0 {
                let overdue = days.abs();
                return if overdue >= CRITICAL_OVERDUE_THRESHOLD_DAYS
                    || final_rejection_amount >= HIGH_REJECTION_AMOUNT
                {
                    NotificationPriority::Critical
                } else {
                    NotificationPriority::High
                };
            }
        }
        if row.status == BatchStatus::NotSubmitted {
            return NotificationPriority::High;
        }
        if row.status == BatchStatus::ReadyToWork {
            return NotificationPriority::Medium;
        }
        if final_rejection_amount >= HIGH_REJECTION_AMOUNT {
            return NotificationPriority::High;
        }
        if final_rejection_amount >= MEDIUM_REJECTION_AMOUNT || due_soon {
            return NotificationPriority::Medium;
        }
        NotificationPriority::Info
    }

    /// Integration team always; PMO on critical/high; compliance on
    /// rejection ratio or amount thresholds.
    fn assign_stakeholders(
        row: &FollowUpRow,
        priority: NotificationPriority,
        final_rejection_amount: f64,
    ) -> Vec<StakeholderGroup> {
        let mut stakeholders = vec![StakeholderGroup::IntegrationTeam];
        if matches!(
            priority,
            NotificationPriority::Critical | NotificationPriority::High
        ) {
            stakeholders.push(StakeholderGroup::Pmo);
        }
        let ratio_breach =
            matches!(row.final_rejection_percent, Some(p) if p >= COMPLIANCE_PERCENT_THRESHOLD);
        if ratio_breach || final_rejection_amount >= HIGH_REJECTION_AMOUNT {
            stakeholders.push(StakeholderGroup::Compliance);
        }
        stakeholders
    }

    fn fallback_correlation_id(&self, row: &FollowUpRow) -> String {
        let branch = slugify(&row.branch_key);
        let payer = slugify(&row.insurance_company);
        let month = row
            .billing_month
            .as_deref()
            .map(slugify)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "month".to_string());
        let year = row
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| self.today.format("%Y").to_string());

        format!(
            "followup-{}-{}-{}-{}-{}",
            if branch.is_empty() { "branch".to_string() } else { branch },
            if payer.is_empty() { "payer".to_string() } else { payer },
            year,
            month,
            short_uid()
        )
    }

    fn build_event(&self, context: AlertContext) -> Result<TeamsEvent> {
        TeamsEvent::new(
            EventType::FollowUpStatus,
            context.correlation_id,
            context.data,
            context.stakeholders,
            context.priority,
        )
    }
}
