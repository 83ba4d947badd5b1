//! Retry driver for whole Refresh, mutate, Commit attempts.
//!
//! Each attempt is a fresh future from the caller's closure: it builds
//! its own store, index and balancer, so nothing leaks between attempts.
//! A commit that half landed is finished on its own snapshot instead
//! (see `InventoryService::commit`); the retry driver never sees it.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::ServiceResult;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_millis(config.backoff_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before attempt `n + 1`.
    pub fn backoff(&self, n: u32) -> Duration {
        self.backoff * n
    }

    /// Run `attempt` until it succeeds, fails with a permanent error, or
    /// the attempt budget is spent. Backoff grows linearly per attempt.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> ServiceResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let mut n = 1;
        loop {
            match attempt(n).await {
                Ok(value) => {
                    if n > 1 {
                        info!(op, attempt = n, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && n < self.attempts => {
                    warn!(op, attempt = n, error = %e, "attempt failed, retrying from a fresh snapshot");
                    tokio::time::sleep(self.backoff(n)).await;
                    n += 1;
                }
                Err(e) => {
                    warn!(op, attempt = n, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}
