//! Circuit breaker for outbound portal and webhook calls

use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests fail fast
    Open,
    /// One probe is allowed to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a probe
    pub open_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 60,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-operation circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Check whether a call may proceed, transitioning open -> half-open
    /// once the open timeout has elapsed.
    fn try_acquire(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                if elapsed > Duration::from_secs(self.config.open_timeout_secs) {
                    info!("Circuit breaker '{}' transitioning to half-open", self.name);
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(Error::CircuitOpen(self.name.clone()))
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        if state.state != CircuitState::Closed {
            info!("Circuit breaker '{}' closing after successful probe", self.name);
        }
        state.state = CircuitState::Closed;
        state.failures = 0;
        state.probe_in_flight = false;
        state.last_failure_at = None;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.last_failure_at = Some(Instant::now());
        state.probe_in_flight = false;
        match state.state {
            CircuitState::Closed => {
                state.failures += 1;
                if state.failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker '{}' opening after {} consecutive failures",
                        self.name, state.failures
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker '{}' reopening after failed probe", self.name);
                state.state = CircuitState::Open;
                state.failures += 1;
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an operation under circuit-breaker protection.
    ///
    /// Returns `Error::CircuitOpen` without invoking the operation while
    /// the circuit is open. The retry policy belongs inside this call, so
    /// a rejected call does not consume retry attempts.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry handing out one breaker per named operation
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreakerRegistry {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(operation.to_string(), self.config.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout_secs: 0,
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _ = cb
            .call(|| async { Err::<(), _>(Error::Network("down".to_string())) })
            .await;
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout_secs: 60,
        });

        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout_secs: 60,
        });
        fail(&cb).await;

        let invoked = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Zero open timeout: the next call is the probe
        let result = cb.call(|| async { Ok::<_, Error>(11) }).await;
        assert_eq!(result.unwrap(), 11);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let cb = CircuitBreaker::new("test", fast_config(1));
        fail(&cb).await;
        fail(&cb).await; // probe fails
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn registry_returns_same_breaker_per_operation() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("nphies:submit");
        let b = registry.get("nphies:submit");
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.get("oases:submit");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
