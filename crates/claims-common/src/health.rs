//! Health reporting shared by connectors and the composition root

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health levels for components
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub message: String,
    pub last_check: DateTime<Utc>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        ComponentHealth {
            status: HealthLevel::Healthy,
            message: message.into(),
            last_check: Utc::now(),
            metrics: HashMap::new(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        ComponentHealth {
            status: HealthLevel::Degraded,
            message: message.into(),
            last_check: Utc::now(),
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

/// Health of the whole platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformHealth {
    pub overall: HealthLevel,
    pub components: HashMap<String, ComponentHealth>,
    pub last_check: DateTime<Utc>,
}

impl PlatformHealth {
    /// Aggregate component health: any critical dominates, then degraded.
    pub fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let overall = if components.is_empty() {
            HealthLevel::Unknown
        } else if components.values().any(|c| c.status == HealthLevel::Critical) {
            HealthLevel::Critical
        } else if components.values().any(|c| c.status == HealthLevel::Degraded) {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        PlatformHealth {
            overall,
            components,
            last_check: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_health_aggregation() {
        let mut components = HashMap::new();
        components.insert("nphies".to_string(), ComponentHealth::healthy("ok"));
        components.insert("oases".to_string(), ComponentHealth::degraded("slow"));

        let platform = PlatformHealth::from_components(components);
        assert_eq!(platform.overall, HealthLevel::Degraded);

        let empty = PlatformHealth::from_components(HashMap::new());
        assert_eq!(empty.overall, HealthLevel::Unknown);
    }
}
