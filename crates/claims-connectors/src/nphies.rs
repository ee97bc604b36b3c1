//! NPHIES platform connector
//!
//! Authenticates through OpenID Connect token exchange, keeps the access
//! token cached with absolute expiry, and issues FHIR requests through the
//! shared retry and circuit-breaker policies.

use crate::{fhir, http, EligibilityOutcome, LoginOutcome, PortalConnector};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use claims_common::config::{HttpConfig, NphiesConfig};
use claims_common::{
    retry_request, CircuitBreakerRegistry, ClaimRequest, ComponentHealth, Error, PortalOutcome,
    Result, SecretProvider, SessionRegistry,
};
use reqwest::{Client, Method};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const PORTAL: &str = "nphies";
const FHIR_CONTENT_TYPE: &str = "application/fhir+json";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
    session_id: String,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Connector for the national health-insurance exchange
pub struct NphiesConnector {
    config: NphiesConfig,
    http_config: HttpConfig,
    client: Client,
    sessions: Arc<SessionRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    secrets: Arc<dyn SecretProvider>,
    token: RwLock<Option<AccessToken>>,
}

impl NphiesConnector {
    pub fn new(
        config: NphiesConfig,
        http_config: HttpConfig,
        sessions: Arc<SessionRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self> {
        let identity =
            http::load_client_identity(config.cert_path.as_deref(), config.key_path.as_deref())?;
        let client = http::build_http_client(&http_config, identity)?;

        Ok(NphiesConnector {
            config,
            http_config,
            client,
            sessions,
            breakers,
            secrets,
            token: RwLock::new(None),
        })
    }

    /// Token request form, using the password grant when the configured
    /// secret carries a username and password.
    async fn token_form(&self) -> Result<Vec<(String, String)>> {
        let mut form = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];

        if let Some(path) = &self.config.credentials_secret_path {
            let secret = self.secrets.read_secret(path).await?;
            if let Some(client_secret) = secret.get("client_secret").and_then(|v| v.as_str()) {
                form.push(("client_secret".to_string(), client_secret.to_string()));
            }
            if let (Some(username), Some(password)) = (
                secret.get("username").and_then(|v| v.as_str()),
                secret.get("password").and_then(|v| v.as_str()),
            ) {
                form[0].1 = "password".to_string();
                form.push(("username".to_string(), username.to_string()));
                form.push(("password".to_string(), password.to_string()));
            }
        }

        Ok(form)
    }

    async fn authenticate(&self) -> Result<AccessToken> {
        info!("Authenticating with NPHIES {}", self.config.environment.as_str());

        let form = self.token_form().await?;
        let response = self
            .client
            .post(self.config.token_url())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!(
                "token exchange failed with status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("invalid token response: {}", e)))?;

        let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in as i64);

        let mut payload = serde_json::Map::new();
        payload.insert("token_type".to_string(), serde_json::json!(token.token_type));
        payload.insert(
            "environment".to_string(),
            serde_json::json!(self.config.environment.as_str()),
        );
        payload.insert(
            "organization_id".to_string(),
            serde_json::json!(self.config.organization_id),
        );

        let session_id = self.sessions.create(
            PORTAL,
            self.config.environment.as_str(),
            payload,
            Duration::from_secs(token.expires_in),
        );

        info!("Authenticated to NPHIES {}", self.config.environment.as_str());

        Ok(AccessToken {
            token: token.access_token,
            expires_at,
            session_id,
        })
    }

    /// Return a valid bearer token, refreshing if missing or expired.
    ///
    /// Fails with `NotAuthenticated` when automatic login is disabled.
    async fn ensure_authenticated(&self) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                if !token.is_expired() {
                    return Ok(token.token.clone());
                }
            }
        }

        if !self.config.auto_login {
            return Err(Error::NotAuthenticated(
                "no valid NPHIES session and automatic login is disabled".to_string(),
            ));
        }

        let mut slot = self.token.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref() {
            if !token.is_expired() {
                return Ok(token.token.clone());
            }
        }

        let token = self.authenticate().await?;
        let bearer = token.token.clone();
        *slot = Some(token);
        Ok(bearer)
    }

    /// Issue an authenticated FHIR request under retry and breaker policy
    async fn request(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let bearer = self.ensure_authenticated().await?;
        let url = format!("{}{}", self.config.base_url(), path);
        let breaker = self.breakers.get(&format!("nphies:{}", operation));

        breaker
            .call(|| {
                retry_request(operation, &self.http_config.retry, || {
                    let bearer = bearer.clone();
                    let url = url.clone();
                    let method = method.clone();
                    async move {
                        let mut request = self
                            .client
                            .request(method, &url)
                            .bearer_auth(bearer)
                            .header(reqwest::header::CONTENT_TYPE, FHIR_CONTENT_TYPE)
                            .header(reqwest::header::ACCEPT, FHIR_CONTENT_TYPE);
                        if let Some(body) = body {
                            request = request.json(body);
                        }

                        let response = request.send().await?;
                        let status = response.status();
                        if status.is_success() {
                            Ok(response.json::<serde_json::Value>().await?)
                        } else {
                            let message = response.text().await.unwrap_or_default();
                            Err(Error::from_status(status.as_u16(), message))
                        }
                    }
                })
            })
            .await
    }

    /// Convert a request error into a structured failure outcome.
    ///
    /// Authentication gaps propagate so callers can distinguish them from
    /// portal rejections.
    fn failure_outcome(&self, error: Error) -> Result<PortalOutcome> {
        match error {
            Error::NotAuthenticated(_) => Err(error),
            other => {
                warn!("NPHIES request failed: {}", other);
                Ok(PortalOutcome::failure(
                    PORTAL,
                    Some(self.config.environment.as_str().to_string()),
                    other.to_string(),
                ))
            }
        }
    }

    fn success_outcome(&self, raw: serde_json::Value) -> PortalOutcome {
        PortalOutcome {
            portal: PORTAL.to_string(),
            branch: Some(self.config.environment.as_str().to_string()),
            success: true,
            claim_id: raw.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
            status: raw
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            error: None,
            raw,
        }
    }
}

#[async_trait]
impl PortalConnector for NphiesConnector {
    fn portal(&self) -> &str {
        PORTAL
    }

    fn branch(&self) -> Option<&str> {
        Some(self.config.environment.as_str())
    }

    async fn login(&self) -> Result<LoginOutcome> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                if !token.is_expired() {
                    return Ok(LoginOutcome {
                        success: true,
                        session_id: Some(token.session_id.clone()),
                        expires_at: Some(token.expires_at),
                        error: None,
                    });
                }
            }
        }

        match self.authenticate().await {
            Ok(token) => {
                let outcome = LoginOutcome {
                    success: true,
                    session_id: Some(token.session_id.clone()),
                    expires_at: Some(token.expires_at),
                    error: None,
                };
                *self.token.write().await = Some(token);
                Ok(outcome)
            }
            Err(e) => {
                error!("NPHIES authentication failed: {}", e);
                Ok(LoginOutcome {
                    success: false,
                    session_id: None,
                    expires_at: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        let mut token = self.token.write().await;
        if let Some(token) = token.take() {
            self.sessions.delete(&token.session_id);
        }
        Ok(())
    }

    async fn submit_claim(&self, claim: &ClaimRequest) -> Result<PortalOutcome> {
        debug!("Submitting claim to NPHIES for patient {}", claim.patient_id);
        let resource = fhir::claim_resource(claim, &self.config.organization_id);

        match self
            .request("submit_claim", Method::POST, "/claim/v1/submit", Some(&resource))
            .await
        {
            Ok(raw) => Ok(self.success_outcome(raw)),
            Err(e) => self.failure_outcome(e),
        }
    }

    async fn claim_status(&self, claim_id: &str) -> Result<PortalOutcome> {
        let path = format!("/claim/v1/status?claim={}", claim_id);
        match self.request("claim_status", Method::GET, &path, None).await {
            Ok(raw) => {
                let mut outcome = self.success_outcome(raw);
                outcome.claim_id = Some(claim_id.to_string());
                Ok(outcome)
            }
            Err(e) => self.failure_outcome(e),
        }
    }

    async fn health_check(&self) -> ComponentHealth {
        let started = std::time::Instant::now();
        let result = self.client.get(self.config.base_url()).send().await;
        let elapsed_ms = started.elapsed().as_millis() as f64;

        match result {
            Ok(_) => ComponentHealth::healthy(format!(
                "nphies {} reachable",
                self.config.environment.as_str()
            ))
            .with_metric("response_time_ms", elapsed_ms),
            Err(e) => ComponentHealth {
                status: claims_common::HealthLevel::Critical,
                message: format!("nphies unreachable: {}", e),
                last_check: Utc::now(),
                metrics: Default::default(),
            },
        }
    }

    async fn check_eligibility(
        &self,
        patient_id: &str,
        insurance_id: &str,
        service_date: Option<NaiveDate>,
    ) -> Result<EligibilityOutcome> {
        debug!("Checking eligibility for patient {}", patient_id);
        let resource = fhir::eligibility_resource(
            patient_id,
            insurance_id,
            service_date,
            &self.config.organization_id,
        );

        match self
            .request("eligibility", Method::POST, "/eligibility/v1/check", Some(&resource))
            .await
        {
            Ok(raw) => Ok(EligibilityOutcome {
                success: true,
                eligible: raw.get("outcome").and_then(|v| v.as_str()) == Some("complete"),
                error: None,
                raw,
            }),
            Err(Error::NotAuthenticated(msg)) => Err(Error::NotAuthenticated(msg)),
            Err(e) => Ok(EligibilityOutcome {
                success: false,
                eligible: false,
                error: Some(e.to_string()),
                raw: serde_json::Value::Null,
            }),
        }
    }

    async fn request_prior_authorization(&self, claim: &ClaimRequest) -> Result<PortalOutcome> {
        debug!("Creating prior authorization for patient {}", claim.patient_id);
        let resource = fhir::prior_authorization_resource(claim, &self.config.organization_id);

        match self
            .request("prior_auth", Method::POST, "/priorauth/v1/create", Some(&resource))
            .await
        {
            Ok(raw) => Ok(self.success_outcome(raw)),
            Err(e) => self.failure_outcome(e),
        }
    }

    async fn send_communication(
        &self,
        claim_id: &str,
        message: &str,
        attachments: &[serde_json::Value],
    ) -> Result<PortalOutcome> {
        let resource = fhir::communication_resource(claim_id, message, attachments);

        match self
            .request("communication", Method::POST, "/communication/v1/send", Some(&resource))
            .await
        {
            Ok(raw) => Ok(self.success_outcome(raw)),
            Err(e) => self.failure_outcome(e),
        }
    }

    async fn poll_status(&self, bundle_id: &str) -> Result<PortalOutcome> {
        let path = format!("/poll/v1/status?bundle={}", bundle_id);
        match self.request("poll_status", Method::GET, &path, None).await {
            Ok(raw) => Ok(self.success_outcome(raw)),
            Err(e) => self.failure_outcome(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims_common::config::NphiesEnvironment;
    use claims_common::{CircuitBreakerConfig, RetryConfig, StaticSecrets};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, auto_login: bool) -> NphiesConfig {
        NphiesConfig {
            environment: NphiesEnvironment::Sandbox,
            base_url_override: Some(server.uri()),
            auth_url: server.uri(),
            auto_login,
            ..NphiesConfig::default()
        }
    }

    fn fast_http_config() -> HttpConfig {
        HttpConfig {
            request_timeout_ms: 2_000,
            max_idle_per_host: 10,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                backoff_multiplier: 2.0,
                max_delay_ms: 5,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 50,
                open_timeout_secs: 60,
            },
        }
    }

    fn connector(server: &MockServer, auto_login: bool) -> NphiesConnector {
        NphiesConnector::new(
            test_config(server, auto_login),
            fast_http_config(),
            Arc::new(SessionRegistry::new()),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            Arc::new(StaticSecrets::new()),
        )
        .unwrap()
    }

    async fn mock_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/realms/sehaticoreprod/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
    }

    fn sample_claim() -> ClaimRequest {
        ClaimRequest {
            patient_id: "p1".to_string(),
            member_id: "m1".to_string(),
            payer_id: "payer".to_string(),
            items: vec![claims_common::ClaimItem {
                code: "99213".to_string(),
                description: None,
                quantity: 1.0,
                unit_price: 150.0,
                service_date: None,
            }],
            total_amount: 150.0,
            insurance_id: "NPHIES-X".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn login_creates_session_and_caches_token() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        let sessions = Arc::new(SessionRegistry::new());
        let connector = NphiesConnector::new(
            test_config(&server, true),
            fast_http_config(),
            sessions.clone(),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            Arc::new(StaticSecrets::new()),
        )
        .unwrap();

        let outcome = connector.login().await.unwrap();
        assert!(outcome.success);
        let session_id = outcome.session_id.unwrap();
        assert!(sessions.get(&session_id).is_some());

        // Second login reuses the cached token
        let second = connector.login().await.unwrap();
        assert_eq!(second.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn submit_claim_happy_path() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        Mock::given(method("POST"))
            .and(path("/claim/v1/submit"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("content-type", FHIR_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "c-1",
                "status": "active",
            })))
            .mount(&server)
            .await;

        let connector = connector(&server, true);
        let outcome = connector.submit_claim(&sample_claim()).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.claim_id.as_deref(), Some("c-1"));
        assert_eq!(outcome.status.as_deref(), Some("active"));
        assert_eq!(outcome.portal, "nphies");
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        Mock::given(method("POST"))
            .and(path("/claim/v1/submit"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let connector = connector(&server, true);
        let outcome = connector.submit_claim(&sample_claim()).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn business_rejection_is_not_retried() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        Mock::given(method("POST"))
            .and(path("/claim/v1/submit"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid coverage"))
            .expect(1)
            .mount(&server)
            .await;

        let connector = connector(&server, true);
        let outcome = connector.submit_claim(&sample_claim()).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("invalid coverage"));
    }

    #[tokio::test]
    async fn auto_login_disabled_fails_with_not_authenticated() {
        let server = MockServer::start().await;
        let connector = connector(&server, false);

        let result = connector.submit_claim(&sample_claim()).await;
        assert!(matches!(result, Err(Error::NotAuthenticated(_))));
    }

    #[tokio::test]
    async fn claim_status_query() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        Mock::given(method("GET"))
            .and(path("/claim/v1/status"))
            .and(query_param("claim", "c-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "complete",
                "outcome": "approved",
            })))
            .mount(&server)
            .await;

        let connector = connector(&server, true);
        let outcome = connector.claim_status("c-7").await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.claim_id.as_deref(), Some("c-7"));
        assert_eq!(outcome.status.as_deref(), Some("complete"));
    }

    #[tokio::test]
    async fn eligibility_maps_outcome_field() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        Mock::given(method("POST"))
            .and(path("/eligibility/v1/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "outcome": "complete",
            })))
            .mount(&server)
            .await;

        let connector = connector(&server, true);
        let outcome = connector
            .check_eligibility("p1", "INS-9", None)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.eligible);
    }

    #[tokio::test]
    async fn logout_clears_token_and_session() {
        let server = MockServer::start().await;
        mock_token_endpoint(&server).await;

        let sessions = Arc::new(SessionRegistry::new());
        let connector = NphiesConnector::new(
            test_config(&server, true),
            fast_http_config(),
            sessions.clone(),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            Arc::new(StaticSecrets::new()),
        )
        .unwrap();

        connector.login().await.unwrap();
        assert_eq!(sessions.len(), 1);

        connector.logout().await.unwrap();
        assert_eq!(sessions.len(), 0);
    }
}
