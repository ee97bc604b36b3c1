//! Portal connectors for the NPHIES claims integration gateway
//!
//! This crate provides the polymorphic connector capability set, the shared
//! HTTP plumbing (keep-alive pooling, timeouts, optional mTLS), and the
//! factory that caches connectors per (portal, branch).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claims_common::{ClaimRequest, ComponentHealth, Error, PortalOutcome, Result};
use serde::{Deserialize, Serialize};

mod factory;
pub mod fhir;
mod http;
mod legacy;
mod nphies;

pub use factory::ConnectorFactory;
pub use http::{build_http_client, load_client_identity};
pub use legacy::LegacyPortalConnector;
pub use nphies::NphiesConnector;

/// Result of a portal login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an eligibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityOutcome {
    pub success: bool,
    pub eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Capability set every portal connector implements.
///
/// Business rejections come back as `PortalOutcome { success: false, .. }`;
/// `Err` is reserved for missing authentication, open circuits, and
/// internal failures.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    fn portal(&self) -> &str;

    fn branch(&self) -> Option<&str>;

    /// Authenticate against the portal and register a session
    async fn login(&self) -> Result<LoginOutcome>;

    /// Invalidate the active session
    async fn logout(&self) -> Result<()>;

    async fn submit_claim(&self, claim: &ClaimRequest) -> Result<PortalOutcome>;

    async fn claim_status(&self, claim_id: &str) -> Result<PortalOutcome>;

    async fn health_check(&self) -> ComponentHealth;

    /// NPHIES extension: FHIR CoverageEligibilityRequest
    async fn check_eligibility(
        &self,
        _patient_id: &str,
        _insurance_id: &str,
        _service_date: Option<chrono::NaiveDate>,
    ) -> Result<EligibilityOutcome> {
        Err(Error::Unsupported(format!(
            "eligibility is not supported by portal {}",
            self.portal()
        )))
    }

    /// NPHIES extension: prior authorization
    async fn request_prior_authorization(&self, _claim: &ClaimRequest) -> Result<PortalOutcome> {
        Err(Error::Unsupported(format!(
            "prior authorization is not supported by portal {}",
            self.portal()
        )))
    }

    /// NPHIES extension: claim communication
    async fn send_communication(
        &self,
        _claim_id: &str,
        _message: &str,
        _attachments: &[serde_json::Value],
    ) -> Result<PortalOutcome> {
        Err(Error::Unsupported(format!(
            "communication is not supported by portal {}",
            self.portal()
        )))
    }

    /// NPHIES extension: poll a transaction bundle
    async fn poll_status(&self, _bundle_id: &str) -> Result<PortalOutcome> {
        Err(Error::Unsupported(format!(
            "bundle polling is not supported by portal {}",
            self.portal()
        )))
    }

    /// Release any resources held by the connector
    async fn close(&self) {}
}
