//! Secret-provider capability
//!
//! All secret and certificate access flows through this trait; nothing in
//! the core reads credentials from the process environment directly.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Dynamic credentials minted with a lease
#[derive(Debug, Clone)]
pub struct LeasedCredentials {
    pub username: String,
    pub password: String,
    pub lease_id: String,
    pub lease_duration: Duration,
}

/// Short-lived client certificate issued by the provider
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub expires_at: DateTime<Utc>,
}

/// Opaque secret source (Vault-like)
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Read a static secret by path
    async fn read_secret(&self, path: &str) -> Result<serde_json::Map<String, serde_json::Value>>;

    /// Mint dynamic database or broker credentials with a lease
    async fn issue_credentials(&self, role: &str) -> Result<LeasedCredentials>;

    /// Issue a short-lived client certificate
    async fn issue_client_certificate(
        &self,
        common_name: &str,
        ttl: Duration,
    ) -> Result<IssuedCertificate>;
}

/// Read one string field out of a secret
pub async fn read_secret_string(
    provider: &dyn SecretProvider,
    path: &str,
    key: &str,
) -> Result<String> {
    let secret = provider.read_secret(path).await?;
    secret
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Configuration(format!("secret {} has no '{}' field", path, key)))
}

/// In-memory provider for tests and development
#[derive(Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, path: &str, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = value {
            self.secrets.insert(path.to_string(), map);
        }
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn read_secret(&self, path: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.secrets
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no secret at path {}", path)))
    }

    async fn issue_credentials(&self, role: &str) -> Result<LeasedCredentials> {
        let secret = self.read_secret(&format!("database/{}", role)).await?;
        Ok(LeasedCredentials {
            username: secret
                .get("username")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            password: secret
                .get("password")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            lease_id: format!("static/{}", role),
            lease_duration: Duration::from_secs(3600),
        })
    }

    async fn issue_client_certificate(
        &self,
        common_name: &str,
        ttl: Duration,
    ) -> Result<IssuedCertificate> {
        let secret = self.read_secret(&format!("pki/{}", common_name)).await?;
        Ok(IssuedCertificate {
            certificate_pem: secret
                .get("certificate")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            private_key_pem: secret
                .get("private_key")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_secrets_round_trip() {
        let secrets = StaticSecrets::new().with_secret(
            "portals/oases/riyadh",
            serde_json::json!({"username": "clerk", "password": "pw"}),
        );

        let value = read_secret_string(&secrets, "portals/oases/riyadh", "username")
            .await
            .unwrap();
        assert_eq!(value, "clerk");

        let missing = read_secret_string(&secrets, "portals/oases/riyadh", "token").await;
        assert!(missing.is_err());

        let absent = secrets.read_secret("portals/unknown").await;
        assert!(absent.is_err());
    }
}
