//! Typed event taxonomy for operational notifications

use chrono::{DateTime, Utc};
use claims_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority of a notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Critical => "critical",
            NotificationPriority::High => "high",
            NotificationPriority::Medium => "medium",
            NotificationPriority::Low => "low",
            NotificationPriority::Info => "info",
        }
    }

    /// Icon + label used on rendered cards
    pub fn label(&self) -> &'static str {
        match self {
            NotificationPriority::Critical => "\u{1F534} Critical",
            NotificationPriority::High => "\u{1F7E0} High",
            NotificationPriority::Medium => "\u{1F7E1} Medium",
            NotificationPriority::Low => "\u{1F7E2} Low",
            NotificationPriority::Info => "\u{1F535} Info",
        }
    }

    /// Adaptive Card container style
    pub fn color(&self) -> &'static str {
        match self {
            NotificationPriority::Critical => "attention",
            NotificationPriority::High => "warning",
            NotificationPriority::Medium => "accent",
            NotificationPriority::Low => "good",
            NotificationPriority::Info => "default",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            NotificationPriority::Critical => "\u{1F6A8}",
            NotificationPriority::High => "\u{26A0}\u{FE0F}",
            NotificationPriority::Medium => "\u{2139}\u{FE0F}",
            NotificationPriority::Low => "\u{1F4DD}",
            NotificationPriority::Info => "\u{1F4E2}",
        }
    }
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of event types the platform raises
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "vault.seal.detected")]
    VaultSealDetected,
    #[serde(rename = "vault.unseal.failed")]
    VaultUnsealFailed,
    #[serde(rename = "vault.certificate.expiring")]
    VaultCertificateExpiring,
    #[serde(rename = "vault.secret.rotation.complete")]
    VaultSecretRotationComplete,
    #[serde(rename = "nphies.eligibility.success")]
    EligibilitySuccess,
    #[serde(rename = "nphies.eligibility.denied")]
    EligibilityDenied,
    #[serde(rename = "nphies.eligibility.failed")]
    EligibilityFailed,
    #[serde(rename = "nphies.claim.submitted")]
    ClaimSubmitted,
    #[serde(rename = "nphies.claim.approved")]
    ClaimApproved,
    #[serde(rename = "nphies.claim.rejected")]
    ClaimRejected,
    #[serde(rename = "nphies.claim.resubmitted")]
    ClaimResubmitted,
    #[serde(rename = "nphies.api.error")]
    ApiError,
    #[serde(rename = "nphies.certificate.invalid")]
    CertificateInvalid,
    #[serde(rename = "followup.batch.status")]
    FollowUpStatus,
    #[serde(rename = "system.rabbitmq.node_down")]
    RabbitmqNodeDown,
    #[serde(rename = "system.postgres.replication_lag")]
    PostgresReplicationLag,
    #[serde(rename = "kubernetes.pod.crashloop")]
    PodCrashloop,
    #[serde(rename = "backup.failed")]
    BackupFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::VaultSealDetected => "vault.seal.detected",
            EventType::VaultUnsealFailed => "vault.unseal.failed",
            EventType::VaultCertificateExpiring => "vault.certificate.expiring",
            EventType::VaultSecretRotationComplete => "vault.secret.rotation.complete",
            EventType::EligibilitySuccess => "nphies.eligibility.success",
            EventType::EligibilityDenied => "nphies.eligibility.denied",
            EventType::EligibilityFailed => "nphies.eligibility.failed",
            EventType::ClaimSubmitted => "nphies.claim.submitted",
            EventType::ClaimApproved => "nphies.claim.approved",
            EventType::ClaimRejected => "nphies.claim.rejected",
            EventType::ClaimResubmitted => "nphies.claim.resubmitted",
            EventType::ApiError => "nphies.api.error",
            EventType::CertificateInvalid => "nphies.certificate.invalid",
            EventType::FollowUpStatus => "followup.batch.status",
            EventType::RabbitmqNodeDown => "system.rabbitmq.node_down",
            EventType::PostgresReplicationLag => "system.postgres.replication_lag",
            EventType::PodCrashloop => "kubernetes.pod.crashloop",
            EventType::BackupFailed => "backup.failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named audiences for notification routing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StakeholderGroup {
    #[serde(rename = "Security Eng.")]
    SecurityEng,
    #[serde(rename = "CloudOps")]
    CloudOps,
    #[serde(rename = "Runtime Eng.")]
    RuntimeEng,
    #[serde(rename = "DevOps")]
    DevOps,
    #[serde(rename = "SRE")]
    Sre,
    #[serde(rename = "Compliance Office")]
    Compliance,
    #[serde(rename = "Integration Team")]
    IntegrationTeam,
    #[serde(rename = "PMO")]
    Pmo,
}

impl StakeholderGroup {
    /// Key used in the stakeholder-to-channel configuration map
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeholderGroup::SecurityEng => "Security Eng.",
            StakeholderGroup::CloudOps => "CloudOps",
            StakeholderGroup::RuntimeEng => "Runtime Eng.",
            StakeholderGroup::DevOps => "DevOps",
            StakeholderGroup::Sre => "SRE",
            StakeholderGroup::Compliance => "Compliance Office",
            StakeholderGroup::IntegrationTeam => "Integration Team",
            StakeholderGroup::Pmo => "PMO",
        }
    }

    /// Friendly name shown on cards
    pub fn friendly_name(&self) -> &'static str {
        match self {
            StakeholderGroup::SecurityEng => "Security Engineering",
            StakeholderGroup::CloudOps => "Cloud Operations",
            StakeholderGroup::RuntimeEng => "Runtime Engineering",
            StakeholderGroup::DevOps => "DevOps",
            StakeholderGroup::Sre => "SRE",
            StakeholderGroup::Compliance => "Compliance Office",
            StakeholderGroup::IntegrationTeam => "Integration Team",
            StakeholderGroup::Pmo => "PMO",
        }
    }
}

/// Normalized operational event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsEvent {
    pub event_type: EventType,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub priority: NotificationPriority,
    pub stakeholders: Vec<StakeholderGroup>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl TeamsEvent {
    /// Build a validated event: the correlation id must be non-empty and
    /// at least one stakeholder must be named. Duplicate stakeholders are
    /// removed, preserving order.
    pub fn new(
        event_type: EventType,
        correlation_id: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
        stakeholders: Vec<StakeholderGroup>,
        priority: NotificationPriority,
    ) -> Result<Self> {
        let correlation_id = correlation_id.into();
        if correlation_id.trim().is_empty() {
            return Err(Error::Validation("correlation_id cannot be empty".to_string()));
        }

        let mut deduped = Vec::new();
        for stakeholder in stakeholders {
            if !deduped.contains(&stakeholder) {
                deduped.push(stakeholder);
            }
        }
        if deduped.is_empty() {
            return Err(Error::Validation(
                "at least one stakeholder must be specified".to_string(),
            ));
        }

        Ok(TeamsEvent {
            event_type,
            correlation_id,
            timestamp: Utc::now(),
            priority,
            stakeholders: deduped,
            data,
        })
    }
}

/// Result of one webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub retry_count: u32,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryReceipt {
    pub fn is_ok(&self) -> bool {
        self.status_code == Some(200)
    }
}

/// A rendered notification bound to its webhook targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsNotification {
    pub id: Uuid,
    pub event: TeamsEvent,
    pub card_payload: serde_json::Value,
    pub webhook_urls: Vec<String>,
}

impl TeamsNotification {
    pub fn new(event: TeamsEvent, card_payload: serde_json::Value, webhook_urls: Vec<String>) -> Self {
        TeamsNotification {
            id: Uuid::new_v4(),
            event,
            card_payload,
            webhook_urls,
        }
    }
}

/// Audit row persisted per webhook target per notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAuditRecord {
    pub id: Uuid,
    pub correlation_id: String,
    pub event_type: String,
    pub stakeholders: Vec<String>,
    pub priority: String,
    pub webhook_url: String,
    pub card_payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationAuditRecord {
    pub fn from_delivery(
        notification: &TeamsNotification,
        webhook_url: &str,
        receipt: &DeliveryReceipt,
    ) -> Self {
        NotificationAuditRecord {
            id: Uuid::new_v4(),
            correlation_id: notification.event.correlation_id.clone(),
            event_type: notification.event.event_type.as_str().to_string(),
            stakeholders: notification
                .event
                .stakeholders
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            priority: notification.event.priority.as_str().to_string(),
            webhook_url: webhook_url.to_string(),
            card_payload: notification.card_payload.clone(),
            sent_at: receipt.sent_at,
            status_code: receipt.status_code,
            retry_count: receipt.retry_count,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_to_dotted_string() {
        let json = serde_json::to_string(&EventType::VaultSealDetected).unwrap();
        assert_eq!(json, "\"vault.seal.detected\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::VaultSealDetected);
        assert_eq!(EventType::ClaimRejected.as_str(), "nphies.claim.rejected");
    }

    #[test]
    fn empty_correlation_id_is_rejected() {
        let result = TeamsEvent::new(
            EventType::ApiError,
            "  ",
            Default::default(),
            vec![StakeholderGroup::Sre],
            NotificationPriority::High,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_stakeholders_are_rejected() {
        let result = TeamsEvent::new(
            EventType::ApiError,
            "corr-1",
            Default::default(),
            vec![],
            NotificationPriority::High,
        );
        assert!(result.is_err());
    }

    #[test]
    fn stakeholders_are_deduplicated_in_order() {
        let event = TeamsEvent::new(
            EventType::ApiError,
            "corr-1",
            Default::default(),
            vec![
                StakeholderGroup::Sre,
                StakeholderGroup::Pmo,
                StakeholderGroup::Sre,
            ],
            NotificationPriority::High,
        )
        .unwrap();
        assert_eq!(
            event.stakeholders,
            vec![StakeholderGroup::Sre, StakeholderGroup::Pmo]
        );
    }

    #[test]
    fn priority_presentation_helpers() {
        assert_eq!(NotificationPriority::Critical.color(), "attention");
        assert_eq!(NotificationPriority::High.color(), "warning");
        assert_eq!(NotificationPriority::Medium.color(), "accent");
        assert_eq!(NotificationPriority::Low.color(), "good");
        assert_eq!(NotificationPriority::Info.color(), "default");
        assert!(NotificationPriority::Critical.label().contains("Critical"));
    }
}
