//! Retry with exponential backoff for throttled calls.
//!
//! Every work item wraps its external call in [`retry_rate_limited`]. Only
//! [`FetchError::RateLimited`] is retried; a 404 or any other failure ends the
//! item at once. The outcome is always returned, never an error, so nothing
//! escapes the item boundary.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::FetchError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff delay.
    pub backoff_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            backoff_ceiling: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    /// delay = min(initial_backoff * 2^(attempt - 1), backoff_ceiling)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.backoff_ceiling)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// Endless sequence of backoff delays: doubling, then flat at the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.policy.delay_for_attempt(self.attempt))
    }
}

/// How a retried call ended.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    /// Still throttled after `max_retries + 1` attempts.
    Exhausted { attempts: u32 },
    NotFound,
    Failed(FetchError),
}

impl<T> RetryOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }
}

/// Run `op` until it succeeds, fails terminally, or runs out of retries.
///
/// `label` names the item in log lines (a coin id, a URL).
pub async fn retry_rate_limited<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut backoff = policy.backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return RetryOutcome::Success { value, attempts },
            Err(FetchError::RateLimited { retry_after_ms }) if attempts <= policy.max_retries => {
                let delay = backoff.next().unwrap_or(policy.backoff_ceiling);
                warn!(
                    item = label,
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    retry_after_ms = ?retry_after_ms,
                    "rate limited, backing off"
                );
                sleep(delay).await;
            }
            Err(FetchError::RateLimited { .. }) => {
                error!(item = label, attempts, "still rate limited after all retries, giving up");
                return RetryOutcome::Exhausted { attempts };
            }
            Err(FetchError::NotFound(msg)) => {
                warn!(item = label, %msg, "not found, skipping");
                return RetryOutcome::NotFound;
            }
            Err(err @ FetchError::Conflict(_)) => {
                warn!(item = label, error = %err, "conflicts with an existing row, skipping");
                return RetryOutcome::Failed(err);
            }
            Err(err) => {
                error!(item = label, error = %err, "request failed");
                return RetryOutcome::Failed(err);
            }
        }
    }
}
