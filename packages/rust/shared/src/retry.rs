//! Centralized retry-with-backoff policy.
//!
//! One policy object is shared by the page fetcher and the embedding client
//! so transient-failure behavior is identical everywhere: exponential backoff
//! up to a bounded attempt count, retrying only errors classified transient
//! by [`DocRagError::is_transient`].

use std::time::Duration;

use crate::error::{DocRagError, Result};

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt cap (first try included). Minimum 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Create a policy from attempt cap and base delay in milliseconds.
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt cap is
    /// reached. A transient embedding error that spends the whole budget is
    /// upgraded to exhausted ([`DocRagError::into_exhausted`]).
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into_exhausted()),
            }
        }
    }

    /// Delay before retry number `attempt + 1`: `base_delay * 2^attempt`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}
