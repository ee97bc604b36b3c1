//! Composition root for the NPHIES claims integration gateway
//!
//! Wires the session registry, connector factory, orchestrator,
//! resubmission engine, and event aggregator into one platform value.
//! There are no module-level singletons; lifecycle is bounded by
//! construction and [`IntegrationGateway::shutdown`].

use claims_common::{
    ClaimRequest, CompositeOutcome, Config, PlatformHealth, Result, SecretProvider,
    SessionRegistry, SubmissionStrategy,
};
use claims_connectors::ConnectorFactory;
use claims_followup::WorksheetProcessor;
use claims_notify::{
    AuditStore, CardBuilder, EventAggregator, EventBus, EventType, MemoryAuditStore,
    NotificationPriority, NullEventBus, RedisEventBus, SqliteAuditStore, StakeholderGroup,
    WebhookSender,
};
use claims_orchestrator::{
    ClaimOptimizer, ClaimValidator, IntegrationOrchestrator, PassthroughOptimizer,
    RuleBasedValidator,
};
use claims_resubmission::{
    EmptyReferenceData, ReferenceData, ResubmissionAttempt, ResubmissionEngine,
    ResubmissionMetrics, ResubmissionStrategy,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize tracing for binaries and examples. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Capabilities the gateway consumes but does not define
pub struct GatewayCapabilities {
    pub validator: Arc<dyn ClaimValidator>,
    pub optimizer: Arc<dyn ClaimOptimizer>,
    pub reference_data: Arc<dyn ReferenceData>,
}

impl Default for GatewayCapabilities {
    fn default() -> Self {
        GatewayCapabilities {
            validator: Arc::new(RuleBasedValidator),
            optimizer: Arc::new(PassthroughOptimizer),
            reference_data: Arc::new(EmptyReferenceData),
        }
    }
}

/// The assembled integration platform
pub struct IntegrationGateway {
    config: Arc<Config>,
    sessions: Arc<SessionRegistry>,
    orchestrator: Arc<IntegrationOrchestrator>,
    resubmission: Arc<ResubmissionEngine>,
    aggregator: Arc<EventAggregator>,
}

impl IntegrationGateway {
    /// Build the platform from configuration, a secret provider, and the
    /// external capabilities.
    pub async fn new(
        config: Config,
        secrets: Arc<dyn SecretProvider>,
        capabilities: GatewayCapabilities,
    ) -> Result<Self> {
        info!("Initializing claims integration gateway");
        let config = Arc::new(config);

        let sessions = Arc::new(SessionRegistry::new());
        let factory = Arc::new(ConnectorFactory::new(
            config.clone(),
            sessions.clone(),
            secrets.clone(),
        ));

        let orchestrator = Arc::new(IntegrationOrchestrator::new(
            config.clone(),
            factory,
            capabilities.validator,
            capabilities.optimizer,
        ));

        let resubmission = Arc::new(ResubmissionEngine::new(
            orchestrator.clone(),
            capabilities.reference_data,
            ResubmissionStrategy::from(&config.resubmission),
        ));

        let notifications = &config.notifications;
        let signing_key = match &notifications.signing_key_secret_path {
            Some(path) => Some(
                claims_common::secrets::read_secret_string(secrets.as_ref(), path, "signing_key")
                    .await?,
            ),
            None => None,
        };

        let audit: Arc<dyn AuditStore> = if notifications.audit_db_url.is_empty() {
            warn!("No audit database configured, keeping audit rows in memory");
            Arc::new(MemoryAuditStore::new())
        } else {
            Arc::new(SqliteAuditStore::connect(&notifications.audit_db_url).await?)
        };

        let bus: Arc<dyn EventBus> = match &notifications.redis_url {
            Some(url) => Arc::new(RedisEventBus::new(url)?),
            None => Arc::new(NullEventBus),
        };

        let aggregator = Arc::new(EventAggregator::new(
            notifications,
            CardBuilder::new(notifications.template_dir.clone(), notifications.links.clone()),
            WebhookSender::new(notifications, signing_key)?,
            audit,
            bus,
        ));

        info!("Gateway initialized");
        Ok(IntegrationGateway {
            config,
            sessions,
            orchestrator,
            resubmission,
            aggregator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn orchestrator(&self) -> &IntegrationOrchestrator {
        &self.orchestrator
    }

    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    /// Submit a claim and raise the matching lifecycle notification
    pub async fn submit_claim(
        &self,
        claim: ClaimRequest,
        strategy: Option<SubmissionStrategy>,
        portals: Option<Vec<String>>,
    ) -> CompositeOutcome {
        let correlation_id = format!("claim-{}", claims_common::utils::short_uid());
        let patient_id = claim.patient_id.clone();
        let amount = claim.total_amount;

        let outcome = self.orchestrator.submit_claim(claim, strategy, portals).await;

        let mut data = serde_json::Map::new();
        data.insert("patient_id".to_string(), json!(patient_id));
        data.insert("amount".to_string(), json!(amount));
        if let Some(portal_outcome) = outcome.per_portal.values().find(|o| o.success) {
            data.insert("claim_id".to_string(), json!(portal_outcome.claim_id.clone()));
        }

        let (event_type, priority) = if outcome.success {
            (EventType::ClaimSubmitted, NotificationPriority::Info)
        } else {
            data.insert(
                "detail".to_string(),
                json!(outcome.error.clone().unwrap_or_else(|| "submission failed".to_string())),
            );
            (EventType::ApiError, NotificationPriority::High)
        };

        self.notify(event_type, &correlation_id, data, vec![StakeholderGroup::IntegrationTeam], priority)
            .await;

        outcome
    }

    /// Resubmit a rejected claim and raise the matching notification
    pub async fn resubmit_claim(
        &self,
        claim_id: &str,
        rejection_code: &str,
        rejection_details: serde_json::Value,
        claim: ClaimRequest,
        claim_amount: f64,
    ) -> ResubmissionAttempt {
        let attempt = self
            .resubmission
            .resubmit(claim_id, rejection_code, rejection_details, claim, claim_amount)
            .await;

        let strategy = self.resubmission.strategy();
        let succeeded = attempt.status == claims_resubmission::AttemptStatus::Accepted;

        if succeeded || strategy.notify_on_failure {
            let mut data = serde_json::Map::new();
            data.insert("claim_id".to_string(), json!(attempt.claim_id.clone()));
            data.insert("amount".to_string(), json!(claim_amount));
            data.insert(
                "rejection_code".to_string(),
                json!(attempt.rejection_code.clone()),
            );
            data.insert("attempt_number".to_string(), json!(attempt.attempt_number));
            data.insert("detail".to_string(), json!(attempt.correction_summary.clone()));

            let mut stakeholders = vec![StakeholderGroup::IntegrationTeam];
            let (event_type, priority) = if succeeded {
                (EventType::ClaimResubmitted, NotificationPriority::Medium)
            } else {
                if attempt.attempt_number >= strategy.escalate_after_attempts {
                    stakeholders.push(StakeholderGroup::Pmo);
                }
                (EventType::ClaimRejected, NotificationPriority::High)
            };

            let correlation_id = format!("resubmit-{}-{}", attempt.claim_id, attempt.attempt_number);
            self.notify(event_type, &correlation_id, data, stakeholders, priority)
                .await;
        }

        attempt
    }

    /// Resubmission metrics surface
    pub fn resubmission_metrics(&self) -> ResubmissionMetrics {
        self.resubmission.metrics()
    }

    /// Scan the follow-up worksheet and deliver one notification per
    /// alerted row. Returns how many notifications were attempted.
    pub async fn process_worksheet(&self) -> Result<usize> {
        let processor = WorksheetProcessor::new(&self.config.followup.worksheet_path);
        let events = processor.generate_events()?;
        let count = events.len();

        for event in events {
            if let Err(e) = self.aggregator.send_event(event).await {
                warn!("Follow-up notification failed: {}", e);
            }
        }

        Ok(count)
    }

    async fn notify(
        &self,
        event_type: EventType,
        correlation_id: &str,
        data: serde_json::Map<String, serde_json::Value>,
        stakeholders: Vec<StakeholderGroup>,
        priority: NotificationPriority,
    ) {
        match self
            .aggregator
            .send_notification(event_type, correlation_id, data, stakeholders, priority)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Notification {} not fully delivered", correlation_id),
            Err(e) => warn!("Notification {} failed: {}", correlation_id, e),
        }
    }

    /// Platform-level health: portal connectors plus session registry size
    pub async fn health_check(&self) -> PlatformHealth {
        let mut components = self.orchestrator.health_check(None).await.components;
        components.insert(
            "sessions".to_string(),
            claims_common::ComponentHealth::healthy("session registry")
                .with_metric("active_sessions", self.sessions.len() as f64),
        );
        PlatformHealth::from_components(components)
    }

    /// Release connector pools and sweep sessions
    pub async fn shutdown(&self) {
        info!("Shutting down claims integration gateway");
        self.orchestrator.shutdown().await;
        let swept = self.sessions.sweep();
        info!("Gateway shut down ({} expired sessions swept)", swept);
    }
}
