//! Per-request retries for transient transport failures.
//!
//! Used by fetchers for single HTTP requests only. A page that still fails
//! after its retries ends the sync attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use kanisync_common::{Error, Result};

/// Retry policy.
///
/// Failed requests wait `base_delay * 2^n` (capped at `max_delay`) before
/// retry `n + 1`, unless the server named its own wait, which is honored up
/// to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for both computed and server-requested waits.
    pub max_delay: Duration,
    /// Spread computed waits over `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            // The API's rate-limit window is one minute
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `retry + 1` after `err`.
    pub fn delay_for(&self, err: &Error, retry: u32) -> Duration {
        if let Some(requested) = err.retry_after() {
            return requested.min(self.max_delay);
        }

        let delay = self
            .base_delay
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay);
        if self.jitter {
            delay / 2 + delay.mul_f64(rand::random::<f64>() * 0.5)
        } else {
            delay
        }
    }
}

/// Runs a request, retrying while it fails with a transient error.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// retries. Only errors for which [`Error::is_transient`] holds are
    /// retried.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("Request succeeded after {} retries", retries);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }
            if retries >= self.config.max_retries {
                warn!("Giving up after {} retries: {}", retries, err);
                return Err(err);
            }

            let delay = self.config.delay_for(&err, retries);
            retries += 1;
            warn!(
                "{}; retry {} of {} in {:?}",
                err, retries, self.config.max_retries, delay
            );
            sleep(delay).await;
        }
    }
}
