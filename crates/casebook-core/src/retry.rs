//! Retry with exponential backoff for collaborator calls.
//!
//! Only calls that leave the process (blob relocation) are retried. Work
//! inside a transaction is deterministic and never retried here.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How often and how patiently to retry a transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failure
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// A configuration that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            exponential_base: 1.0,
        }
    }

    /// Delay to wait after `attempt` failures (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = (self.initial_delay_ms as f64) * self.exponential_base.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or runs out
/// of attempts. The last error is returned.
pub async fn retry_transient<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
    mut is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: FnMut(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempts = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => {
                tracing::debug!(operation, error = %e, "Permanent failure, not retrying");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(operation, attempts = attempt, error = %e, "Retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
