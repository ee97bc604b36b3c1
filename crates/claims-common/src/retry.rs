//! Retry policy with exponential backoff for outbound calls

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Upper bound on the delay between attempts
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay to sleep after the given 1-based attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Execute an operation with retry on transient failures.
///
/// Non-retryable errors (validation, business 4xx, circuit-open) fail
/// immediately; the final attempt's error is propagated.
pub async fn retry_request<T, F, Fut>(operation: &str, config: &RetryConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=config.max_attempts.max(1) {
        debug!(
            "Executing {} (attempt {}/{})",
            operation, attempt, config.max_attempts
        );

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation {} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                debug!("Operation {} failed with non-retryable error: {}", operation, e);
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Operation {} failed on attempt {}/{}: {}",
                    operation, attempt, config.max_attempts, e
                );
                last_error = Some(e);

                if attempt < config.max_attempts {
                    let delay = config.delay_for_attempt(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Internal(format!("{}: no attempts executed", operation))))
}
