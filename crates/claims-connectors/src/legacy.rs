//! Legacy insurer portal connector
//!
//! Covers the credential-based portals (OASES, MOH and similar): login
//! yields an opaque session token that is kept in the session registry and
//! attached to claim submissions for that branch.

use crate::{http, LoginOutcome, PortalConnector};
use async_trait::async_trait;
use chrono::Utc;
use claims_common::config::{HttpConfig, LegacyPortalConfig};
use claims_common::{
    retry_request, CircuitBreakerRegistry, ClaimRequest, ComponentHealth, Error, HealthLevel,
    PortalOutcome, Result, SecretProvider, SessionRegistry,
};
use reqwest::{Client, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct LegacyPortalConnector {
    portal: String,
    branch: String,
    config: LegacyPortalConfig,
    http_config: HttpConfig,
    client: Client,
    sessions: Arc<SessionRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    secrets: Arc<dyn SecretProvider>,
    session_id: RwLock<Option<String>>,
}

impl LegacyPortalConnector {
    pub fn new(
        portal: impl Into<String>,
        branch: impl Into<String>,
        config: LegacyPortalConfig,
        http_config: HttpConfig,
        sessions: Arc<SessionRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self> {
        let client = http::build_http_client(&http_config, None)?;
        Ok(LegacyPortalConnector {
            portal: portal.into(),
            branch: branch.into(),
            config,
            http_config,
            client,
            sessions,
            breakers,
            secrets,
            session_id: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn credentials_secret_path(&self) -> Result<&str> {
        self.config
            .branches
            .get(&self.branch)
            .or_else(|| self.config.branches.get(""))
            .map(|s| s.as_str())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no credentials configured for {} branch {}",
                    self.portal, self.branch
                ))
            })
    }

    /// Return the active portal token, logging in when none is held.
    async fn ensure_session(&self) -> Result<String> {
        {
            let session_id = self.session_id.read().await;
            if let Some(id) = session_id.as_ref() {
                if let Some(record) = self.sessions.get(id) {
                    if let Some(token) = record.payload.get("token").and_then(|v| v.as_str()) {
                        return Ok(token.to_string());
                    }
                }
            }
        }

        let outcome = self.login().await?;
        if !outcome.success {
            return Err(Error::Authentication(
                outcome
                    .error
                    .unwrap_or_else(|| format!("{} login failed", self.portal)),
            ));
        }

        let session_id = outcome
            .session_id
            .ok_or_else(|| Error::Session("login returned no session".to_string()))?;
        let record = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| Error::Session("session vanished after login".to_string()))?;
        record
            .payload
            .get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Session("session has no portal token".to_string()))
    }

    async fn request(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let token = self.ensure_session().await?;
        let url = self.url(path);
        let breaker = self
            .breakers
            .get(&format!("{}_{}:{}", self.portal, self.branch, operation));

        breaker
            .call(|| {
                retry_request(operation, &self.http_config.retry, || {
                    let token = token.clone();
                    let url = url.clone();
                    let method = method.clone();
                    async move {
                        let mut request = self
                            .client
                            .request(method, &url)
                            .header("X-Session-Token", token);
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

    fn failure_outcome(&self, error: Error) -> Result<PortalOutcome> {
        match error {
            Error::NotAuthenticated(_) => Err(error),
            other => {
                warn!(
                    "{} {} request failed: {}",
                    self.portal, self.branch, other
                );
                Ok(PortalOutcome::failure(
                    self.portal.clone(),
                    Some(self.branch.clone()),
                    other.to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl PortalConnector for LegacyPortalConnector {
    fn portal(&self) -> &str {
        &self.portal
    }

    fn branch(&self) -> Option<&str> {
        Some(&self.branch)
    }

    async fn login(&self) -> Result<LoginOutcome> {
        debug!("Logging in to {} branch {}", self.portal, self.branch);

        let secret_path = self.credentials_secret_path()?;
        let secret = self.secrets.read_secret(secret_path).await?;
        let username = secret.get("username").and_then(|v| v.as_str()).unwrap_or_default();
        let password = secret.get("password").and_then(|v| v.as_str()).unwrap_or_default();

        let response = self
            .client
            .post(self.url(&self.config.login_path))
            .json(&serde_json::json!({
                "username": username,
                "password": password,
                "branch": self.branch,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(LoginOutcome {
                success: false,
                session_id: None,
                expires_at: None,
                error: Some(format!("login rejected with status {}: {}", status, body)),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let token = body
            .get("token")
            .or_else(|| body.get("session"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Authentication("login response carried no token".to_string()))?;

        let mut payload = serde_json::Map::new();
        payload.insert("token".to_string(), serde_json::json!(token));

        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let session_id = self.sessions.create(&self.portal, &self.branch, payload, ttl);
        let expires_at = Utc::now() + chrono::Duration::seconds(self.config.session_ttl_secs as i64);

        *self.session_id.write().await = Some(session_id.clone());

        Ok(LoginOutcome {
            success: true,
            session_id: Some(session_id),
            expires_at: Some(expires_at),
            error: None,
        })
    }

    async fn logout(&self) -> Result<()> {
        let mut session_id = self.session_id.write().await;
        if let Some(id) = session_id.take() {
            self.sessions.delete(&id);
        }
        Ok(())
    }

    async fn submit_claim(&self, claim: &ClaimRequest) -> Result<PortalOutcome> {
        debug!(
            "Submitting claim to {} branch {} for patient {}",
            self.portal, self.branch, claim.patient_id
        );

        let body = serde_json::to_value(claim)?;
        match self
            .request("submit_claim", Method::POST, &self.config.claims_path, Some(&body))
            .await
        {
            Ok(raw) => Ok(PortalOutcome {
                portal: self.portal.clone(),
                branch: Some(self.branch.clone()),
                success: true,
                claim_id: raw
                    .get("claim_id")
                    .or_else(|| raw.get("id"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                status: raw
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                error: None,
                raw,
            }),
            Err(e) => self.failure_outcome(e),
        }
    }

    async fn claim_status(&self, claim_id: &str) -> Result<PortalOutcome> {
        let path = format!("{}/{}", self.config.claims_path.trim_end_matches('/'), claim_id);
        match self.request("claim_status", Method::GET, &path, None).await {
            Ok(raw) => Ok(PortalOutcome {
                portal: self.portal.clone(),
                branch: Some(self.branch.clone()),
                success: true,
                claim_id: Some(claim_id.to_string()),
                status: raw
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                error: None,
                raw,
            }),
            Err(e) => self.failure_outcome(e),
        }
    }

    async fn health_check(&self) -> ComponentHealth {
        let started = std::time::Instant::now();
        match self.client.get(&self.config.base_url).send().await {
            Ok(_) => ComponentHealth::healthy(format!(
                "{} {} reachable",
                self.portal, self.branch
            ))
            .with_metric("response_time_ms", started.elapsed().as_millis() as f64),
            Err(e) => ComponentHealth {
                status: HealthLevel::Critical,
                message: format!("{} {} unreachable: {}", self.portal, self.branch, e),
                last_check: Utc::now(),
                metrics: Default::default(),
            },
        }
    }
}
