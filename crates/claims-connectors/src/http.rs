//! Shared HTTP client construction for portal connectors

use claims_common::config::HttpConfig;
use claims_common::{Error, Result};
use reqwest::{Client, ClientBuilder, Identity};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Build the pooled HTTP client used by a connector.
///
/// Keep-alive connections are capped per host and every request carries
/// the configured timeout. When an identity is supplied the client
/// authenticates with mTLS.
pub fn build_http_client(config: &HttpConfig, identity: Option<Identity>) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .user_agent(concat!("claims-gateway/", env!("CARGO_PKG_VERSION")));

    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Load an mTLS client identity from certificate and key PEM files.
///
/// Returns `None` (with a warning) when either file is missing so the
/// connector can fall back to TLS-only.
pub fn load_client_identity(
    cert_path: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<Option<Identity>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (Some(c), Some(k)) => (c, k),
        _ => return Ok(None),
    };

    if !cert_path.exists() || !key_path.exists() {
        warn!(
            "client certificate not found ({} / {}), falling back to TLS-only",
            cert_path.display(),
            key_path.display()
        );
        return Ok(None);
    }

    let cert = std::fs::read(cert_path)
        .map_err(|e| Error::Configuration(format!("failed to read {}: {}", cert_path.display(), e)))?;
    let key = std::fs::read(key_path)
        .map_err(|e| Error::Configuration(format!("failed to read {}: {}", key_path.display(), e)))?;

    let mut pem = Vec::with_capacity(cert.len() + key.len() + 1);
    pem.extend_from_slice(&cert);
    pem.push(b'\n');
    pem.extend_from_slice(&key);

    let identity = Identity::from_pem(&pem)
        .map_err(|e| Error::Configuration(format!("invalid client certificate: {}", e)))?;

    info!("client initialized with certificate authentication");
    Ok(Some(identity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_with_defaults() {
        let client = build_http_client(&HttpConfig::default(), None);
        assert!(client.is_ok());
    }

    #[test]
    fn missing_certificates_fall_back_to_tls_only() {
        let identity = load_client_identity(
            Some(Path::new("/nonexistent/cert.pem")),
            Some(Path::new("/nonexistent/key.pem")),
        )
        .unwrap();
        assert!(identity.is_none());
    }

    #[test]
    fn unconfigured_certificates_are_skipped() {
        assert!(load_client_identity(None, None).unwrap().is_none());
    }
}
