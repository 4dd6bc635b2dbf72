//! ============================================================================
//! Retry Logic - Exponential Backoff with Jitter
//! ============================================================================
//! Wraps fallible async network calls with:
//! - Exponential backoff (base delay doubling per attempt)
//! - Additive random jitter
//! - Error classification (retryable vs permanent)
//! ============================================================================

use anyhow::{anyhow, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries (multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter added to every delay
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_jitter_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_jitter_ms: 0,
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Error is likely transient, should retry
    Retryable,
    /// Error is permanent, don't retry
    Permanent,
}

/// Classify an error message to determine if retry is appropriate.
/// Malformed keys/addresses and authorization failures never succeed on retry.
pub fn classify_error(error: &str) -> ErrorKind {
    let lower = error.to_lowercase();

    if lower.contains("invalid public key")
        || lower.contains("invalid address")
        || lower.contains("unauthorized")
    {
        return ErrorKind::Permanent;
    }

    ErrorKind::Retryable
}

/// Calculate delay with exponential backoff and additive jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);

    let jitter = if config.max_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.max_jitter_ms)
    } else {
        0
    };

    Duration::from_millis(base_delay.saturating_add(jitter))
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
/// `label` names the operation in logs and in the final error.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = String::new();

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let error_str = e.to_string();
                let kind = classify_error(&error_str);

                warn!(
                    "{} attempt {} failed ({:?}): {}",
                    label,
                    attempt + 1,
                    kind,
                    error_str
                );

                if kind == ErrorKind::Permanent {
                    return Err(e);
                }

                last_error = error_str;

                if attempt + 1 < config.max_attempts {
                    let delay = calculate_delay(attempt, config);
                    debug!("Retrying {} after {:?}", label, delay);
                    sleep(delay).await;
                }
            }
        }
    }

    Err(anyhow!(
        "{} failed after {} attempts: {}",
        label,
        config.max_attempts,
        last_error
    ))
}
