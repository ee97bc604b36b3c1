//! Integration orchestrator for the NPHIES claims gateway
//!
//! Applies a submission strategy to route a claim across one or more
//! portal connectors and aggregates the per-portal outcomes into a
//! composite result. Per-portal failures are captured, never propagated.

use claims_common::{
    ClaimRequest, CompositeOutcome, ComponentHealth, Config, Error, HealthLevel, PlatformHealth,
    PortalOutcome, Result, Stage, SubmissionStrategy,
};
use claims_connectors::{ConnectorFactory, EligibilityOutcome};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub mod validation;

pub use validation::{ClaimOptimizer, ClaimValidator, PassthroughOptimizer, RuleBasedValidator};

/// Outcome of a batch submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<CompositeOutcome>,
}

/// Orchestrates claim traffic across NPHIES and the legacy portals
pub struct IntegrationOrchestrator {
    config: Arc<Config>,
    factory: Arc<ConnectorFactory>,
    validator: Arc<dyn ClaimValidator>,
    optimizer: Arc<dyn ClaimOptimizer>,
}

impl IntegrationOrchestrator {
    pub fn new(
        config: Arc<Config>,
        factory: Arc<ConnectorFactory>,
        validator: Arc<dyn ClaimValidator>,
        optimizer: Arc<dyn ClaimOptimizer>,
    ) -> Self {
        IntegrationOrchestrator {
            config,
            factory,
            validator,
            optimizer,
        }
    }

    /// Submit a claim through the selected strategy.
    ///
    /// Validation failures return without any portal traffic; the
    /// composite `success` is the disjunction of per-portal successes.
    pub async fn submit_claim(
        &self,
        claim: ClaimRequest,
        strategy: Option<SubmissionStrategy>,
        portals: Option<Vec<String>>,
    ) -> CompositeOutcome {
        let validation = match self.validator.validate(&claim).await {
            Ok(report) => report,
            Err(e) => {
                return CompositeOutcome {
                    success: false,
                    stage: Stage::Validation,
                    strategy: None,
                    per_portal: HashMap::new(),
                    validation: None,
                    optimization: None,
                    error: Some(format!("validator unavailable: {}", e)),
                }
            }
        };

        if !validation.is_valid {
            warn!("Claim failed validation: {:?}", validation.errors);
            return CompositeOutcome::validation_failure(validation);
        }
        if validation.confidence < 0.7 {
            warn!("Low validation confidence: {:.2}", validation.confidence);
        }

        let (claim, optimization) = match self.optimizer.optimize(&claim).await {
            Ok(report) => {
                if !report.suggestions.is_empty() {
                    info!("Optimizer suggested {} adjustments", report.suggestions.len());
                }
                match &report.optimized {
                    Some(optimized) => (optimized.clone(), Some(report)),
                    None => (claim, Some(report)),
                }
            }
            Err(e) => {
                warn!("Optimizer unavailable, submitting original claim: {}", e);
                (claim, None)
            }
        };

        let mut strategy = strategy.unwrap_or(self.config.routing.default_strategy);
        if strategy == SubmissionStrategy::SmartRoute {
            strategy = self.smart_route(&claim);
            info!("Smart routing selected strategy {:?}", strategy);
        }

        let per_portal = match strategy {
            SubmissionStrategy::NphiesOnly => {
                let (key, outcome) = self.submit_to_nphies(&claim).await;
                HashMap::from([(key, outcome)])
            }
            SubmissionStrategy::LegacyOnly => self.submit_to_legacy(&claim, portals.as_deref()).await,
            SubmissionStrategy::NphiesFirst => {
                let (key, outcome) = self.submit_to_nphies(&claim).await;
                if outcome.success {
                    HashMap::from([(key, outcome)])
                } else {
                    warn!("NPHIES submission failed, falling back to legacy portals");
                    let mut results = self.submit_to_legacy(&claim, portals.as_deref()).await;
                    results.insert(key, outcome);
                    results
                }
            }
            SubmissionStrategy::AllPortals => {
                let (nphies, mut legacy) = tokio::join!(
                    self.submit_to_nphies(&claim),
                    self.submit_to_legacy(&claim, portals.as_deref())
                );
                legacy.insert(nphies.0, nphies.1);
                legacy
            }
            SubmissionStrategy::SmartRoute => unreachable!("smart route resolved above"),
        };

        let mut outcome = CompositeOutcome::from_outcomes(strategy, per_portal);
        outcome.validation = Some(validation);
        outcome.optimization = optimization;
        outcome
    }

    /// Routing rule table: first rule matching the insurance id wins
    fn smart_route(&self, claim: &ClaimRequest) -> SubmissionStrategy {
        let insurance = claim.insurance_id.to_uppercase();
        for rule in &self.config.routing.smart_rules {
            if insurance.contains(&rule.insurance_contains.to_uppercase()) {
                // A rule pointing back at smart routing would never resolve
                if rule.strategy != SubmissionStrategy::SmartRoute {
                    return rule.strategy;
                }
            }
        }
        SubmissionStrategy::NphiesFirst
    }

    async fn submit_to_nphies(&self, claim: &ClaimRequest) -> (String, PortalOutcome) {
        let outcome = match self.factory.get("nphies", None).await {
            Ok(connector) => match connector.submit_claim(claim).await {
                Ok(outcome) => outcome,
                Err(e) => PortalOutcome::failure("nphies", None, e.to_string()),
            },
            Err(e) => PortalOutcome::failure("nphies", None, e.to_string()),
        };
        ("nphies".to_string(), outcome)
    }

    /// One (portal, branch) target per configured branch; portals without
    /// branches get a single target.
    fn legacy_targets(&self, portals: Option<&[String]>) -> Vec<(String, Option<String>)> {
        let portals: Vec<String> = portals
            .map(|p| p.to_vec())
            .unwrap_or_else(|| self.config.routing.default_legacy_portals.clone());

        let mut targets = Vec::new();
        for portal in portals {
            let branches = self.factory.branches_of(&portal);
            if branches.is_empty() {
                targets.push((portal, None));
            } else {
                for branch in branches {
                    targets.push((portal.clone(), Some(branch)));
                }
            }
        }
        targets
    }

    /// Concurrent legacy fan-out; one task per (portal, branch), failures
    /// captured per target.
    async fn submit_to_legacy(
        &self,
        claim: &ClaimRequest,
        portals: Option<&[String]>,
    ) -> HashMap<String, PortalOutcome> {
        let targets = self.legacy_targets(portals);

        let submissions = targets.into_iter().map(|(portal, branch)| {
            let claim = claim.clone();
            async move {
                let key = match &branch {
                    Some(b) => format!("{}_{}", portal, b),
                    None => portal.clone(),
                };
                let outcome = match self.factory.get(&portal, branch.as_deref()).await {
                    Ok(connector) => match connector.submit_claim(&claim).await {
                        Ok(outcome) => outcome,
                        Err(e) => PortalOutcome::failure(portal.clone(), branch.clone(), e.to_string()),
                    },
                    Err(e) => PortalOutcome::failure(portal.clone(), branch.clone(), e.to_string()),
                };
                (key, outcome)
            }
        });

        join_all(submissions).await.into_iter().collect()
    }

    /// Check patient eligibility via NPHIES
    pub async fn check_eligibility(
        &self,
        patient_id: &str,
        insurance_id: &str,
        service_date: Option<chrono::NaiveDate>,
    ) -> Result<EligibilityOutcome> {
        let connector = self.factory.get("nphies", None).await?;
        connector
            .check_eligibility(patient_id, insurance_id, service_date)
            .await
    }

    /// Create a prior authorization via NPHIES, validating first
    pub async fn create_prior_authorization(&self, claim: &ClaimRequest) -> Result<PortalOutcome> {
        let validation = self.validator.validate(claim).await?;
        if !validation.is_valid {
            return Err(Error::Validation(validation.errors.join("; ")));
        }

        let connector = self.factory.get("nphies", None).await?;
        connector.request_prior_authorization(claim).await
    }

    /// Query claim status on a specific portal
    pub async fn claim_status(
        &self,
        claim_id: &str,
        portal: &str,
        branch: Option<&str>,
    ) -> Result<PortalOutcome> {
        let connector = self.factory.get(portal, branch).await?;
        connector.claim_status(claim_id).await
    }

    /// Send a claim communication via NPHIES
    pub async fn send_communication(
        &self,
        claim_id: &str,
        message: &str,
        attachments: &[serde_json::Value],
    ) -> Result<PortalOutcome> {
        let connector = self.factory.get("nphies", None).await?;
        connector.send_communication(claim_id, message, attachments).await
    }

    /// Submit multiple claims concurrently
    pub async fn batch_submit(
        &self,
        claims: Vec<ClaimRequest>,
        strategy: Option<SubmissionStrategy>,
    ) -> BatchOutcome {
        info!("Batch submitting {} claims", claims.len());

        let submissions = claims
            .into_iter()
            .map(|claim| self.submit_claim(claim, strategy, None));
        let results = join_all(submissions).await;

        let successful = results.iter().filter(|r| r.success).count();
        BatchOutcome {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }

    /// Health of all portals, or of one when named
    pub async fn health_check(&self, portal: Option<&str>) -> PlatformHealth {
        let portals: Vec<String> = match portal {
            Some(p) => vec![p.to_string()],
            None => self.factory.known_portals(),
        };

        let checks = portals.into_iter().map(|portal| async move {
            let branch = self.factory.branches_of(&portal).into_iter().next();
            let health = match self.factory.get(&portal, branch.as_deref()).await {
                Ok(connector) => connector.health_check().await,
                Err(e) => ComponentHealth {
                    status: HealthLevel::Unknown,
                    message: e.to_string(),
                    last_check: chrono::Utc::now(),
                    metrics: Default::default(),
                },
            };
            (portal, health)
        });

        let components: HashMap<String, ComponentHealth> = join_all(checks).await.into_iter().collect();
        PlatformHealth::from_components(components)
    }

    /// Release connector resources at shutdown
    pub async fn shutdown(&self) {
        info!("Shutting down integration orchestrator");
        self.factory.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims_common::config::{LegacyPortalConfig, NphiesConfig, NphiesEnvironment};
    use claims_common::{
        CircuitBreakerConfig, ClaimItem, RetryConfig, SessionRegistry, StaticSecrets,
    };
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        orchestrator: IntegrationOrchestrator,
        _nphies: MockServer,
        _legacy: MockServer,
    }

    async fn mock_nphies_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/realms/sehaticoreprod/protocol/openid-connect/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
    }

    async fn mock_legacy_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "legacy-token",
            })))
            .mount(server)
            .await;
    }

    async fn harness(nphies: MockServer, legacy: MockServer) -> Harness {
        let mut config = Config::default();
        config.http.retry = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            max_delay_ms: 5,
        };
        config.http.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 100,
            open_timeout_secs: 60,
        };
        config.nphies = NphiesConfig {
            environment: NphiesEnvironment::Sandbox,
            base_url_override: Some(nphies.uri()),
            auth_url: nphies.uri(),
            ..NphiesConfig::default()
        };

        let mut branches = HashMap::new();
        branches.insert("a".to_string(), "portals/oases/a".to_string());
        branches.insert("b".to_string(), "portals/oases/b".to_string());
        config.legacy_portals.insert(
            "oases".to_string(),
            LegacyPortalConfig {
                base_url: legacy.uri(),
                login_path: "/api/v1/login".to_string(),
                claims_path: "/api/v1/claims".to_string(),
                branches,
                session_ttl_secs: 600,
            },
        );
        config.routing.default_legacy_portals = vec!["oases".to_string()];

        let secrets = StaticSecrets::new()
            .with_secret("portals/oases/a", serde_json::json!({"username": "a", "password": "pw"}))
            .with_secret("portals/oases/b", serde_json::json!({"username": "b", "password": "pw"}));

        let config = Arc::new(config);
        let factory = Arc::new(ConnectorFactory::new(
            config.clone(),
            Arc::new(SessionRegistry::new()),
            Arc::new(secrets),
        ));

        Harness {
            orchestrator: IntegrationOrchestrator::new(
                config,
                factory,
                Arc::new(RuleBasedValidator),
                Arc::new(PassthroughOptimizer),
            ),
            _nphies: nphies,
            _legacy: legacy,
        }
    }

    fn claim(insurance_id: &str) -> ClaimRequest {
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
            insurance_id: insurance_id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn nphies_only_happy_path() {
        let nphies = MockServer::start().await;
        mock_nphies_auth(&nphies).await;
        Mock::given(method("POST"))
            .and(path("/claim/v1/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "c-1",
                "status": "active",
            })))
            .mount(&nphies)
            .await;
        let legacy = MockServer::start().await;

        let h = harness(nphies, legacy).await;
        let outcome = h
            .orchestrator
            .submit_claim(claim("NPHIES-X"), Some(SubmissionStrategy::NphiesOnly), None)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.stage, Stage::Submission);
        assert_eq!(outcome.strategy, Some(SubmissionStrategy::NphiesOnly));
        let nphies_outcome = &outcome.per_portal["nphies"];
        assert!(nphies_outcome.success);
        assert_eq!(nphies_outcome.claim_id.as_deref(), Some("c-1"));
        assert!(outcome.validation.unwrap().is_valid);
    }

    #[tokio::test]
    async fn empty_items_fails_validation_without_portal_traffic() {
        let nphies = MockServer::start().await;
        let legacy = MockServer::start().await;
        let h = harness(nphies, legacy).await;

        let mut bad_claim = claim("NPHIES-X");
        bad_claim.items.clear();
        bad_claim.total_amount = 0.0;

        let outcome = h.orchestrator.submit_claim(bad_claim, None, None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Stage::Validation);
        assert!(outcome.per_portal.is_empty());
        // No portal requests were issued
        assert!(h._nphies.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nphies_first_fails_over_to_legacy_branches() {
        let nphies = MockServer::start().await;
        mock_nphies_auth(&nphies).await;
        // NPHIES keeps failing past the retry budget
        Mock::given(method("POST"))
            .and(path("/claim/v1/submit"))
            .respond_with(ResponseTemplate::new(500).set_body_string("unavailable"))
            .expect(3)
            .mount(&nphies)
            .await;

        let legacy = MockServer::start().await;
        mock_legacy_login(&legacy).await;
        // First branch to arrive succeeds, the other is rejected
        Mock::given(method("POST"))
            .and(path("/api/v1/claims"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "claim_id": "OAS-1",
                "status": "received",
            })))
            .up_to_n_times(1)
            .mount(&legacy)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/claims"))
            .respond_with(ResponseTemplate::new(422).set_body_string("rejected"))
            .mount(&legacy)
            .await;

        let h = harness(nphies, legacy).await;
        let outcome = h
            .orchestrator
            .submit_claim(claim("NPHIES-X"), Some(SubmissionStrategy::NphiesFirst), None)
            .await;

        assert!(outcome.success);
        assert!(!outcome.per_portal["nphies"].success);
        let successes = outcome
            .per_portal
            .iter()
            .filter(|(k, v)| k.starts_with("oases_") && v.success)
            .count();
        let failures = outcome
            .per_portal
            .iter()
            .filter(|(k, v)| k.starts_with("oases_") && !v.success)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn smart_route_sends_bupa_to_all_portals() {
        let nphies = MockServer::start().await;
        let legacy = MockServer::start().await;
        let h = harness(nphies, legacy).await;

        assert_eq!(
            h.orchestrator.smart_route(&claim("BUPA-GOLD-1")),
            SubmissionStrategy::AllPortals
        );
        assert_eq!(
            h.orchestrator.smart_route(&claim("TAW-BALSAM_GOLD")),
            SubmissionStrategy::NphiesOnly
        );
        // When both substrings appear, the BALSAM_GOLD rule wins
        assert_eq!(
            h.orchestrator.smart_route(&claim("BUPA-BALSAM_GOLD-77")),
            SubmissionStrategy::NphiesOnly
        );
        assert_eq!(
            h.orchestrator.smart_route(&claim("OTHER")),
            SubmissionStrategy::NphiesFirst
        );
    }

    #[tokio::test]
    async fn batch_submit_counts_results() {
        let nphies = MockServer::start().await;
        mock_nphies_auth(&nphies).await;
        Mock::given(method("POST"))
            .and(path("/claim/v1/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "c-2",
                "status": "active",
            })))
            .mount(&nphies)
            .await;
        let legacy = MockServer::start().await;

        let h = harness(nphies, legacy).await;
        let mut invalid = claim("X");
        invalid.items.clear();
        invalid.total_amount = 0.0;

        let batch = h
            .orchestrator
            .batch_submit(
                vec![claim("NPHIES-X"), invalid],
                Some(SubmissionStrategy::NphiesOnly),
            )
            .await;

        assert_eq!(batch.total, 2);
        assert_eq!(batch.successful, 1);
        assert_eq!(batch.failed, 1);
    }
}
