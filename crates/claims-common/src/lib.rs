//! Common types and utilities for the NPHIES claims integration gateway
//!
//! This crate provides shared types, policy primitives, and capability
//! traits used across all components of the integration platform.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod retry;
pub mod secrets;
pub mod session;
pub mod types;
pub mod utils;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use config::Config;
pub use error::{Error, Result};
pub use health::{ComponentHealth, HealthLevel, PlatformHealth};
pub use retry::{retry_request, RetryConfig};
pub use secrets::{SecretProvider, StaticSecrets};
pub use session::{SessionRecord, SessionRegistry};
pub use types::*;
