//! Lazy connector construction and caching

use crate::{LegacyPortalConnector, NphiesConnector, PortalConnector};
use claims_common::{
    CircuitBreakerRegistry, Config, Error, Result, SecretProvider, SessionRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Factory caching one connector per (portal, branch).
///
/// Construction reads configuration only; credentials are not validated
/// until the connector first authenticates.
pub struct ConnectorFactory {
    config: Arc<Config>,
    sessions: Arc<SessionRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    secrets: Arc<dyn SecretProvider>,
    connectors: RwLock<HashMap<String, Arc<dyn PortalConnector>>>,
}

impl ConnectorFactory {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionRegistry>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.http.circuit_breaker.clone(),
        ));
        ConnectorFactory {
            config,
            sessions,
            breakers,
            secrets,
            connectors: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(portal: &str, branch: Option<&str>) -> String {
        format!("{}_{}", portal, branch.unwrap_or(""))
    }

    /// Get or lazily create the connector for a portal branch
    pub async fn get(&self, portal: &str, branch: Option<&str>) -> Result<Arc<dyn PortalConnector>> {
        let key = Self::cache_key(portal, branch);

        {
            let connectors = self.connectors.read().await;
            if let Some(connector) = connectors.get(&key) {
                return Ok(connector.clone());
            }
        }

        let mut connectors = self.connectors.write().await;
        // Another caller may have created the connector while we waited
        if let Some(connector) = connectors.get(&key) {
            return Ok(connector.clone());
        }

        debug!("Creating connector for {}", key);
        let connector = self.create(portal, branch)?;
        connectors.insert(key, connector.clone());
        Ok(connector)
    }

    fn create(&self, portal: &str, branch: Option<&str>) -> Result<Arc<dyn PortalConnector>> {
        if portal == "nphies" {
            let connector = NphiesConnector::new(
                self.config.nphies.clone(),
                self.config.http.clone(),
                self.sessions.clone(),
                self.breakers.clone(),
                self.secrets.clone(),
            )?;
            return Ok(Arc::new(connector));
        }

        let portal_config = self
            .config
            .legacy_portals
            .get(portal)
            .ok_or_else(|| Error::Configuration(format!("unknown portal: {}", portal)))?;

        let connector = LegacyPortalConnector::new(
            portal,
            branch.unwrap_or(""),
            portal_config.clone(),
            self.config.http.clone(),
            self.sessions.clone(),
            self.breakers.clone(),
            self.secrets.clone(),
        )?;
        Ok(Arc::new(connector))
    }

    /// Branches configured for a legacy portal (empty for NPHIES)
    pub fn branches_of(&self, portal: &str) -> Vec<String> {
        self.config
            .legacy_portals
            .get(portal)
            .map(|c| {
                let mut branches: Vec<String> = c.branches.keys().cloned().collect();
                branches.sort();
                branches
            })
            .unwrap_or_default()
    }

    /// All portals the factory can construct
    pub fn known_portals(&self) -> Vec<String> {
        let mut portals = vec!["nphies".to_string()];
        let mut legacy: Vec<String> = self.config.legacy_portals.keys().cloned().collect();
        legacy.sort();
        portals.extend(legacy);
        portals
    }

    /// Release HTTP pools held by cached connectors
    pub async fn close_all(&self) {
        let mut connectors = self.connectors.write().await;
        info!("Closing {} cached connectors", connectors.len());
        for connector in connectors.values() {
            connector.close().await;
        }
        connectors.clear();
    }
}
