//! Per-item retry with exponential backoff.
//!
//! Transient client errors are retried up to a configured budget, then
//! demoted to a permanent failure the reconciler records and moves past.
//! Permanent errors come back immediately.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::clients::{ClientError, ClientResult};

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 0 means one attempt total.
    pub max_retries: u32,
    /// Backoff base: the delay before retry n is `base * 2^n` seconds.
    pub base_delay_secs: u64,
    /// Cap on any single delay, server-suggested waits included.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2,
            max_delay_secs: 60,
        }
    }
}

/// How a retried operation ended: the error that stopped it and the
/// number of attempts made, the first call included.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: ClientError,
}

impl std::fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay_secs,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed for this error.
    pub fn should_retry(&self, attempt: u32, error: &ClientError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    /// Delay before the next attempt. A server-suggested wait from a
    /// rate-limit response wins over the exponential schedule; both are
    /// capped at `max_delay_secs`.
    pub fn delay_for(&self, attempt: u32, error: &ClientError) -> Duration {
        let secs = match error.retry_after_secs() {
            Some(after) => after.min(self.max_delay_secs),
            None => self
                .base_delay_secs
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay_secs),
        };
        Duration::from_secs(secs)
    }

    /// Runs `f` until it succeeds, fails permanently, or the budget is
    /// spent. The closure receives the attempt index (0 on the first
    /// call) so callers can make replayed attempts idempotent. A failure
    /// comes back with the attempt count so callers can record it.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = ClientResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay_for(attempt, &error);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "retrying transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    let attempts = attempt + 1;
                    if error.is_transient() {
                        // Budget spent: demote to a permanent failure.
                        warn!(operation, attempts, error = %error, "retry budget exhausted");
                        return Err(RetryFailure {
                            attempts,
                            error: ClientError::RetriesExhausted {
                                attempts,
                                message: format!(
                                    "{operation} failed after {attempts} attempt(s): {error}"
                                ),
                            },
                        });
                    }
                    return Err(RetryFailure { attempts, error });
                }
            }
        }
    }
}
