//! Retry with exponential backoff for transient install failures

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Errors that may succeed if the same operation is attempted again.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Backoff after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn run_with_retry<F, Fut, T, E>(operation: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        debug!(operation, attempt, max_attempts, "Starting attempt");

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying after backoff"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(operation, attempt, error = %err, "Giving up");
                return Err(err);
            }
        }
    }
}
