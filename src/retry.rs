//! Retry logic for store mutations
//!
//! Exponential backoff with jitter around a fallible async operation.
//! Only errors that report [`GuardError::is_retryable`] are retried;
//! anything else bails immediately.

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Configuration for repository retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 25,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed)
    ///
    /// `base_delay * 2^attempt`, capped at `max_delay`, with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let capped = exp_delay.min(self.max_delay_ms);

        let jitter_range = capped / 4;
        let delay = if jitter_range > 0 {
            let jitter_offset = (attempt as u64 * 7 + 3) % (jitter_range * 2 + 1);
            capped - jitter_range + jitter_offset
        } else {
            capped
        };

        Duration::from_millis(delay)
    }
}

/// Execute an async operation with retry.
///
/// `operation` receives the 0-indexed attempt number. After the last
/// attempt the last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, operation: F) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = label, retries = attempt, "Store operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(operation = label, attempts, error = %err, "Store operation exhausted retries");
                }
                return Err(err);
            }
        }
    }
}

/// Convenience for building a verification failure inside an attempt
pub(crate) fn verify(condition: bool, operation: &str, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(GuardError::verification(operation, reason))
    }
}
