//! Event aggregation and delivery orchestration
//!
//! Single façade for operational notifications: validates and publishes
//! the event, renders the card, resolves stakeholder webhooks, delivers
//! concurrently, and persists one audit row per target.

use crate::audit::AuditStore;
use crate::card::CardBuilder;
use crate::events::{
    EventType, NotificationAuditRecord, NotificationPriority, StakeholderGroup, TeamsEvent,
    TeamsNotification,
};
use crate::pubsub::EventBus;
use crate::sender::WebhookSender;
use claims_common::config::NotificationsConfig;
use claims_common::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct EventAggregator {
    builder: CardBuilder,
    sender: WebhookSender,
    audit: Arc<dyn AuditStore>,
    bus: Arc<dyn EventBus>,
    /// Stakeholder display name -> channel key
    stakeholder_channels: HashMap<String, String>,
    /// Channel key -> webhook URL
    webhooks: HashMap<String, String>,
    channel_prefix: String,
}

impl EventAggregator {
    pub fn new(
        config: &NotificationsConfig,
        builder: CardBuilder,
        sender: WebhookSender,
        audit: Arc<dyn AuditStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        EventAggregator {
            builder,
            sender,
            audit,
            bus,
            stakeholder_channels: config.stakeholder_channels.clone(),
            webhooks: config.webhooks.clone(),
            channel_prefix: config.channel_prefix.clone(),
        }
    }

    /// Map stakeholders to webhook URLs, deduplicating shared channels.
    /// Missing mappings are logged and skipped.
    fn resolve_webhooks(&self, stakeholders: &[StakeholderGroup]) -> Vec<String> {
        let mut urls = Vec::new();
        for stakeholder in stakeholders {
            let url = self
                .stakeholder_channels
                .get(stakeholder.as_str())
                .and_then(|channel| self.webhooks.get(channel));
            match url {
                Some(url) => {
                    if !urls.contains(url) {
                        urls.push(url.clone());
                    }
                }
                None => warn!("No webhook URL mapped for stakeholder {}", stakeholder.as_str()),
            }
        }
        urls
    }

    /// Build, route, and deliver a notification.
    ///
    /// Returns `Ok(true)` iff every resolved webhook returned 200. Pub/sub
    /// and audit failures are logged and do not change the result.
    pub async fn send_notification(
        &self,
        event_type: EventType,
        correlation_id: &str,
        data: serde_json::Map<String, serde_json::Value>,
        stakeholders: Vec<StakeholderGroup>,
        priority: NotificationPriority,
    ) -> Result<bool> {
        let event = TeamsEvent::new(event_type, correlation_id, data, stakeholders, priority)?;
        self.send_event(event).await
    }

    /// Deliver an already-constructed event (worksheet processor path)
    pub async fn send_event(&self, event: TeamsEvent) -> Result<bool> {
        info!(
            "Processing notification {} ({})",
            event.event_type, event.correlation_id
        );

        // Best-effort real-time distribution
        let channel = format!("{}{}", self.channel_prefix, event.event_type);
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&channel, &payload).await {
                    warn!("Failed to publish event to {}: {}", channel, e);
                }
            }
            Err(e) => warn!("Failed to serialize event for pub/sub: {}", e),
        }

        let card = self.builder.build_card(&event).await;

        let webhook_urls = self.resolve_webhooks(&event.stakeholders);
        if webhook_urls.is_empty() {
            error!(
                "No webhook URLs resolved for stakeholders {:?} ({})",
                event.stakeholders, event.correlation_id
            );
            return Ok(false);
        }

        let notification = TeamsNotification::new(event, card, webhook_urls.clone());

        // Deliver concurrently; each target writes its own audit row
        let deliveries = webhook_urls.iter().map(|url| {
            let notification = &notification;
            async move {
                let receipt = self
                    .sender
                    .send(
                        url,
                        &notification.card_payload,
                        &notification.event.correlation_id,
                        notification.event.priority,
                    )
                    .await;

                let record = NotificationAuditRecord::from_delivery(notification, url, &receipt);
                if let Err(e) = self.audit.record(&record).await {
                    error!(
                        "Failed to persist audit row for {}: {}",
                        notification.event.correlation_id, e
                    );
                }

                if !receipt.is_ok() {
                    error!(
                        "Delivery to {} failed for {} (status {:?})",
                        url, notification.event.correlation_id, receipt.status_code
                    );
                }
                receipt.is_ok()
            }
        });

        let results = join_all(deliveries).await;
        let success = results.iter().all(|ok| *ok);
        debug!(
            "Notification {} delivered to {}/{} targets",
            notification.event.correlation_id,
            results.iter().filter(|ok| **ok).count(),
            results.len()
        );
        Ok(success)
    }

    /// Mark an audited notification acknowledged
    pub async fn acknowledge(&self, id: uuid::Uuid, user: &str) -> Result<bool> {
        self.audit.acknowledge(id, user).await
    }
}
