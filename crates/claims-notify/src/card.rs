//! Adaptive Card rendering
//!
//! Templates are JSON files with `{{field}}` placeholders, keyed by event
//! type; several event types share a template. Any template or parse
//! failure falls back to a generic card built in code, so rendering
//! never fails a notification.

use crate::events::{EventType, TeamsEvent};
use chrono::{DateTime, Utc};
use claims_common::config::NotificationLinks;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid placeholder pattern"));

const MESSAGE_TYPE: &str = "message";
const CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

fn template_for(event_type: EventType) -> &'static str {
    match event_type {
        EventType::VaultSealDetected
        | EventType::VaultUnsealFailed
        | EventType::VaultCertificateExpiring
        | EventType::VaultSecretRotationComplete => "vault_security_event.json",
        EventType::EligibilitySuccess
        | EventType::EligibilityDenied
        | EventType::EligibilityFailed => "nphies_eligibility.json",
        EventType::ClaimSubmitted
        | EventType::ClaimApproved
        | EventType::ClaimRejected
        | EventType::ClaimResubmitted => "nphies_claim_event.json",
        EventType::ApiError | EventType::CertificateInvalid => "nphies_api_error.json",
        EventType::FollowUpStatus => "follow_up_status.json",
        EventType::RabbitmqNodeDown
        | EventType::PostgresReplicationLag
        | EventType::PodCrashloop
        | EventType::BackupFailed => "system_alert.json",
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Escape a value for insertion inside a JSON string literal
fn escape_for_json_string(value: &str) -> String {
    let quoted = serde_json::to_string(value).unwrap_or_default();
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&quoted)
        .to_string()
}

/// Template-driven Adaptive Card builder
pub struct CardBuilder {
    template_dir: PathBuf,
    links: NotificationLinks,
    cache: RwLock<HashMap<String, String>>,
}

impl CardBuilder {
    pub fn new(template_dir: PathBuf, links: NotificationLinks) -> Self {
        CardBuilder {
            template_dir,
            links,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Render the Adaptive Card payload for an event, wrapped in the
    /// Teams message envelope. Falls back to a generic card on any
    /// template or parse failure; never fails.
    pub async fn build_card(&self, event: &TeamsEvent) -> Value {
        let template_name = template_for(event.event_type);
        debug!(
            "Building card from template {} for {}",
            template_name, event.correlation_id
        );

        let template = match self.load_template(template_name).await {
            Some(template) => template,
            None => {
                warn!(
                    "Template {} not found, using fallback card for {}",
                    template_name, event.correlation_id
                );
                return self.fallback_card(event);
            }
        };

        let context = self.render_context(event);
        let rendered = PLACEHOLDER.replace_all(&template, |caps: &regex::Captures<'_>| {
            context
                .get(&caps[1])
                .map(|v| escape_for_json_string(v))
                .unwrap_or_default()
        });

        match serde_json::from_str::<Value>(&rendered) {
            Ok(card) => ensure_message_envelope(card),
            Err(e) => {
                error!(
                    "Template {} rendered invalid JSON ({}), using fallback card",
                    template_name, e
                );
                self.fallback_card(event)
            }
        }
    }

    async fn load_template(&self, name: &str) -> Option<String> {
        {
            let cache = self.cache.read().await;
            if let Some(template) = cache.get(name) {
                return Some(template.clone());
            }
        }

        let path = self.template_dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(template) => {
                self.cache
                    .write()
                    .await
                    .insert(name.to_string(), template.clone());
                Some(template)
            }
            Err(e) => {
                debug!("Failed to read template {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Context available to templates: event metadata, formatted
    /// priority, container color, stakeholder names, standard URLs, and
    /// every event data field (nested values as compact JSON).
    fn render_context(&self, event: &TeamsEvent) -> HashMap<String, String> {
        let mut context = HashMap::new();

        context.insert("event_type".to_string(), event.event_type.as_str().to_string());
        context.insert("correlation_id".to_string(), event.correlation_id.clone());
        context.insert("timestamp".to_string(), format_timestamp(event.timestamp));
        context.insert("priority".to_string(), event.priority.as_str().to_string());
        context.insert("priority_formatted".to_string(), event.priority.label().to_string());
        context.insert("priority_color".to_string(), event.priority.color().to_string());
        context.insert("alert_icon".to_string(), event.priority.icon().to_string());
        context.insert(
            "stakeholders_formatted".to_string(),
            event
                .stakeholders
                .iter()
                .map(|s| s.friendly_name())
                .collect::<Vec<_>>()
                .join(", "),
        );

        context.insert("monitoring_url".to_string(), self.links.monitoring_url.clone());
        context.insert("runbook_url".to_string(), self.links.runbook_url.clone());
        context.insert("portal_url".to_string(), self.links.portal_url.clone());
        context.insert(
            "portal_status_url".to_string(),
            self.links.portal_status_url.clone(),
        );

        for (key, value) in &event.data {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            context.insert(key.clone(), rendered);
        }

        context
    }

    /// Generic card built in code for unknown events and render failures
    fn fallback_card(&self, event: &TeamsEvent) -> Value {
        let data_pretty =
            serde_json::to_string_pretty(&Value::Object(event.data.clone())).unwrap_or_default();

        let card = json!({
            "type": "AdaptiveCard",
            "version": "1.5",
            "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
            "body": [
                {
                    "type": "Container",
                    "style": event.priority.color(),
                    "items": [{
                        "type": "TextBlock",
                        "text": format!("{} {}", event.priority.icon(), event.event_type),
                        "weight": "bolder",
                        "size": "large",
                    }]
                },
                {
                    "type": "FactSet",
                    "facts": [
                        { "title": "Priority:", "value": event.priority.label() },
                        { "title": "Event Type:", "value": event.event_type.as_str() },
                        { "title": "Correlation ID:", "value": event.correlation_id },
                        { "title": "Timestamp:", "value": format_timestamp(event.timestamp) },
                        {
                            "title": "Stakeholders:",
                            "value": event.stakeholders.iter()
                                .map(|s| s.friendly_name())
                                .collect::<Vec<_>>()
                                .join(", "),
                        },
                    ]
                },
                {
                    "type": "TextBlock",
                    "text": data_pretty,
                    "wrap": true,
                    "fontType": "monospace",
                    "spacing": "medium",
                }
            ]
        });

        ensure_message_envelope(card)
    }
}

/// Wrap a card in the Teams message envelope. Idempotent: payloads that
/// already carry the envelope pass through unchanged.
pub fn ensure_message_envelope(card: Value) -> Value {
    if card.get("type").and_then(|v| v.as_str()) == Some(MESSAGE_TYPE) {
        return card;
    }

    json!({
        "type": MESSAGE_TYPE,
        "attachments": [{
            "contentType": CARD_CONTENT_TYPE,
            "content": card,
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NotificationPriority, StakeholderGroup};
    use std::io::Write;

    fn event(priority: NotificationPriority) -> TeamsEvent {
        let mut data = serde_json::Map::new();
        data.insert("claim_id".to_string(), json!("c-9"));
        data.insert("amount".to_string(), json!(1500.5));
        TeamsEvent::new(
            EventType::ClaimRejected,
            "corr-42",
            data,
            vec![StakeholderGroup::IntegrationTeam, StakeholderGroup::Pmo],
            priority,
        )
        .unwrap()
    }

    fn builder_with_template(name: &str, content: &str) -> (CardBuilder, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let builder = CardBuilder::new(dir.path().to_path_buf(), NotificationLinks::default());
        (builder, dir)
    }

    #[tokio::test]
    async fn renders_template_with_placeholders() {
        let template = r#"{
            "type": "AdaptiveCard",
            "version": "1.5",
            "body": [{
                "type": "TextBlock",
                "text": "{{ alert_icon }} Claim {{claim_id}} ({{priority_formatted}})"
            }],
            "style": "{{priority_color}}"
        }"#;
        let (builder, _dir) = builder_with_template("nphies_claim_event.json", template);

        let card = builder.build_card(&event(NotificationPriority::High)).await;

        assert_eq!(card["type"], "message");
        let content = &card["attachments"][0]["content"];
        assert_eq!(content["style"], "warning");
        let text = content["body"][0]["text"].as_str().unwrap();
        assert!(text.contains("Claim c-9"));
        assert!(text.contains("High"));
    }

    #[tokio::test]
    async fn missing_template_yields_envelope_shaped_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CardBuilder::new(dir.path().to_path_buf(), NotificationLinks::default());

        let card = builder.build_card(&event(NotificationPriority::Critical)).await;

        assert_eq!(card["type"], "message");
        assert_eq!(card["attachments"][0]["contentType"], CARD_CONTENT_TYPE);
        let content = &card["attachments"][0]["content"];
        assert_eq!(content["body"][0]["style"], "attention");
        let facts = content["body"][1]["facts"].as_array().unwrap();
        assert!(facts
            .iter()
            .any(|f| f["value"] == "nphies.claim.rejected"));
    }

    #[tokio::test]
    async fn invalid_template_json_falls_back() {
        let (builder, _dir) = builder_with_template("nphies_claim_event.json", "{ not json");
        let card = builder.build_card(&event(NotificationPriority::Info)).await;
        assert_eq!(card["type"], "message");
    }

    #[tokio::test]
    async fn rendering_is_deterministic_modulo_timestamp() {
        let template = r#"{"type": "AdaptiveCard", "body": [{"type": "TextBlock", "text": "{{claim_id}}"}]}"#;
        let (builder, _dir) = builder_with_template("nphies_claim_event.json", template);

        let e = event(NotificationPriority::Medium);
        let first = builder.build_card(&e).await;
        let second = builder.build_card(&e).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn placeholder_values_are_json_escaped() {
        let template = r#"{"type": "AdaptiveCard", "body": [{"type": "TextBlock", "text": "{{note}}"}]}"#;
        let (builder, _dir) = builder_with_template("nphies_claim_event.json", template);

        let mut data = serde_json::Map::new();
        data.insert("note".to_string(), json!("line1\nline2 \"quoted\""));
        let event = TeamsEvent::new(
            EventType::ClaimRejected,
            "corr-1",
            data,
            vec![StakeholderGroup::Sre],
            NotificationPriority::Info,
        )
        .unwrap();

        let card = builder.build_card(&event).await;
        let text = card["attachments"][0]["content"]["body"][0]["text"]
            .as_str()
            .unwrap();
        assert_eq!(text, "line1\nline2 \"quoted\"");
    }

    #[test]
    fn envelope_wrapping_is_idempotent() {
        let card = json!({"type": "AdaptiveCard", "body": []});
        let wrapped = ensure_message_envelope(card);
        let double = ensure_message_envelope(wrapped.clone());
        assert_eq!(wrapped, double);
        assert_eq!(wrapped["type"], "message");
    }
}
