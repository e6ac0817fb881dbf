//! Bounded exponential backoff for backend calls.
//!
//! Only [`BackendError::Transient`] failures (and attempt timeouts) are
//! retried. Delay before attempt `n` (1-based retries) is
//! `initial_backoff · 2^(n-1)`, capped at `max_backoff`.

use std::future::Future;
use std::time::Duration;

use edu_rag_core::BackendError;

use crate::config::ImportConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// Delay before retry number `retry` (1 = first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

/// Run `call` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut last_err = None;

    for attempt in 0..policy.max_attempts.max(1) {
        if attempt > 0 {
            let delay = policy.backoff_for(attempt);
            tracing::debug!(operation, attempt, ?delay, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(policy.attempt_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!(operation, attempt, error = %e, "transient backend failure");
                last_err = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(operation, attempt, "attempt timed out");
                last_err = Some(BackendError::Transient(format!(
                    "{operation} timed out after {:?}",
                    policy.attempt_timeout
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| BackendError::Unavailable(format!("{operation} failed after retries"))))
}
