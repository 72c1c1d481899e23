//! Exponential connect backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ClientError;

/// Retry policy for establishing a transport connection.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt
    pub base: Duration,
    /// Cap on any single delay
    pub max: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(16),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (zero-based).
    ///
    /// attempt 0: base
    /// attempt 1: base * 2
    /// attempt n: min(base * 2^n, max)
    pub fn delay_after_failure(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        std::cmp::min(self.base.saturating_mul(multiplier), self.max)
    }

    /// Run `attempt_fn` until it succeeds or the attempt cap is reached,
    /// sleeping between failures.
    pub async fn retry<T, F, Fut>(&self, name: &str, mut attempt_fn: F) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{}: connected on attempt {}", name, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{}: connect attempt {}/{} failed: {}", name, attempt + 1, attempts, e);
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.delay_after_failure(attempt)).await;
                    }
                }
            }
        }

        Err(ClientError::ConnectFailed {
            attempts,
            last: last_error,
        })
    }
}
