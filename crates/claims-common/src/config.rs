//! Configuration for the integration gateway

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use crate::types::SubmissionStrategy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub nphies: NphiesConfig,
    /// Per-legacy-portal configuration keyed by portal name
    #[serde(default)]
    pub legacy_portals: HashMap<String, LegacyPortalConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub resubmission: ResubmissionConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub followup: FollowUpConfig,
}

impl Config {
    /// Load configuration from an optional file plus `CLAIMS_`-prefixed
    /// environment variables (`CLAIMS_NPHIES__REALM=...`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CLAIMS")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Configuration(e.to_string()))
    }
}

/// Outbound HTTP policy shared by connectors and the webhook sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub request_timeout_ms: u64,
    /// Keep-alive pool cap per host
    pub max_idle_per_host: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_idle_per_host: 10,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// NPHIES target environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NphiesEnvironment {
    Production,
    Sandbox,
    Conformance,
}

impl Default for NphiesEnvironment {
    fn default() -> Self {
        NphiesEnvironment::Production
    }
}

impl NphiesEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            NphiesEnvironment::Production => "production",
            NphiesEnvironment::Sandbox => "sandbox",
            NphiesEnvironment::Conformance => "conformance",
        }
    }
}

/// NPHIES connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NphiesConfig {
    pub environment: NphiesEnvironment,
    /// Overrides the environment base URL (tests, private gateways)
    #[serde(default)]
    pub base_url_override: Option<String>,
    pub auth_url: String,
    pub realm: String,
    pub client_id: String,
    /// Secret path holding `client_secret` (and `username`/`password` for
    /// the password grant)
    #[serde(default)]
    pub credentials_secret_path: Option<String>,
    pub organization_id: String,
    pub chi_id: String,
    pub license: String,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// When false, operations fail with NotAuthenticated instead of
    /// logging in on demand
    pub auto_login: bool,
}

impl Default for NphiesConfig {
    fn default() -> Self {
        Self {
            environment: NphiesEnvironment::Production,
            base_url_override: None,
            auth_url: "https://sso.nphies.sa".to_string(),
            realm: "sehaticoreprod".to_string(),
            client_id: "community".to_string(),
            credentials_secret_path: None,
            organization_id: "10000000000988".to_string(),
            chi_id: "1048".to_string(),
            license: "7000911508".to_string(),
            cert_path: None,
            key_path: None,
            auto_login: true,
        }
    }
}

impl NphiesConfig {
    /// Base URL selected by environment unless overridden
    pub fn base_url(&self) -> String {
        if let Some(url) = &self.base_url_override {
            return url.trim_end_matches('/').to_string();
        }
        match self.environment {
            NphiesEnvironment::Production => "https://HSB.nphies.sa".to_string(),
            NphiesEnvironment::Sandbox => "https://sandbox.nphies.sa".to_string(),
            NphiesEnvironment::Conformance => "https://conformance.nphies.sa".to_string(),
        }
    }

    /// OpenID Connect token endpoint
    pub fn token_url(&self) -> String {
        format!(
            "{}/auth/realms/{}/protocol/openid-connect/token",
            self.auth_url.trim_end_matches('/'),
            self.realm
        )
    }
}

/// Legacy portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyPortalConfig {
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_claims_path")]
    pub claims_path: String,
    /// Branch name -> secret path holding `username`/`password`.
    /// Portals without branches use a single entry keyed "".
    #[serde(default)]
    pub branches: HashMap<String, String>,
    /// Session TTL granted by the portal after login
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_login_path() -> String {
    "/api/v1/login".to_string()
}

fn default_claims_path() -> String {
    "/api/v1/claims".to_string()
}

fn default_session_ttl_secs() -> u64 {
    1800
}

/// Orchestrator routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub default_strategy: SubmissionStrategy,
    /// Legacy portals used when a fan-out names none explicitly
    pub default_legacy_portals: Vec<String>,
    #[serde(default)]
    pub smart_rules: Vec<RouteRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: SubmissionStrategy::NphiesFirst,
            default_legacy_portals: vec!["oases".to_string(), "moh".to_string()],
            // First match wins: BALSAM_GOLD outranks the broader BUPA rule
            smart_rules: vec![
                RouteRule {
                    insurance_contains: "BALSAM_GOLD".to_string(),
                    strategy: SubmissionStrategy::NphiesOnly,
                },
                RouteRule {
                    insurance_contains: "BUPA".to_string(),
                    strategy: SubmissionStrategy::AllPortals,
                },
            ],
        }
    }
}

/// One smart-routing rule: first match on the claim's insurance id wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub insurance_contains: String,
    pub strategy: SubmissionStrategy,
}

/// Resubmission engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmissionConfig {
    pub max_attempts: u32,
    pub retry_delay_hours: u32,
    pub escalate_after_attempts: u32,
    pub auto_correct_enabled: bool,
    pub notify_on_failure: bool,
}

impl Default for ResubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_hours: 24,
            escalate_after_attempts: 2,
            auto_correct_enabled: true,
            notify_on_failure: true,
        }
    }
}

/// Standard URLs surfaced on rendered cards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLinks {
    pub monitoring_url: String,
    pub runbook_url: String,
    pub portal_url: String,
    pub portal_status_url: String,
}

impl Default for NotificationLinks {
    fn default() -> Self {
        Self {
            monitoring_url: "https://grafana.claimbridge.sa".to_string(),
            runbook_url: "https://docs.claimbridge.sa/runbooks".to_string(),
            portal_url: "https://portal.nphies.sa".to_string(),
            portal_status_url: "https://status.nphies.sa".to_string(),
        }
    }
}

/// Teams notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Channel key -> incoming webhook URL
    #[serde(default)]
    pub webhooks: HashMap<String, String>,
    /// Stakeholder display name -> channel key
    #[serde(default = "default_stakeholder_channels")]
    pub stakeholder_channels: HashMap<String, String>,
    /// Secret path holding `signing_key` for HMAC signatures
    #[serde(default)]
    pub signing_key_secret_path: Option<String>,
    pub max_requests_per_minute: u32,
    pub max_burst: u32,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub request_timeout_secs: u64,
    pub redis_url: Option<String>,
    pub channel_prefix: String,
    pub audit_db_url: String,
    pub template_dir: PathBuf,
    #[serde(default)]
    pub links: NotificationLinks,
}

fn default_stakeholder_channels() -> HashMap<String, String> {
    [
        ("Security Eng.", "security"),
        ("CloudOps", "devops"),
        ("Runtime Eng.", "runtime"),
        ("DevOps", "devops"),
        ("SRE", "runtime"),
        ("Compliance Office", "compliance"),
        ("Integration Team", "integration"),
        ("PMO", "general"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhooks: HashMap::new(),
            stakeholder_channels: default_stakeholder_channels(),
            signing_key_secret_path: None,
            max_requests_per_minute: 60,
            max_burst: 10,
            max_retries: 3,
            backoff_factor: 2.0,
            request_timeout_secs: 30,
            redis_url: None,
            channel_prefix: "teams:events:".to_string(),
            audit_db_url: "sqlite::memory:".to_string(),
            template_dir: PathBuf::from("templates/cards"),
            links: NotificationLinks::default(),
        }
    }
}

/// Follow-up worksheet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpConfig {
    pub worksheet_path: PathBuf,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            worksheet_path: PathBuf::from("daily-follow-ups.csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nphies_base_url_tracks_environment() {
        let mut cfg = NphiesConfig::default();
        assert_eq!(cfg.base_url(), "https://HSB.nphies.sa");

        cfg.environment = NphiesEnvironment::Sandbox;
        assert_eq!(cfg.base_url(), "https://sandbox.nphies.sa");

        cfg.base_url_override = Some("http://127.0.0.1:9000/".to_string());
        assert_eq!(cfg.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn token_url_shape() {
        let cfg = NphiesConfig::default();
        assert_eq!(
            cfg.token_url(),
            "https://sso.nphies.sa/auth/realms/sehaticoreprod/protocol/openid-connect/token"
        );
    }

    #[test]
    fn default_config_deserializes_from_empty() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.http.request_timeout_ms, 30_000);
        assert_eq!(cfg.resubmission.max_attempts, 3);
        assert_eq!(cfg.routing.default_strategy, SubmissionStrategy::NphiesFirst);
        assert_eq!(
            cfg.notifications.stakeholder_channels.get("PMO"),
            Some(&"general".to_string())
        );
    }
}
