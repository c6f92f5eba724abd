use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{AutomationError, AutomationResult};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded exponential backoff. `max_retries` counts retries after the
/// initial attempt, so the operation runs at most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (zero based): base, 2x, 4x, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Runs `op` with the attempt number until it succeeds, fails terminally,
    /// or the retries run out. Nothing sleeps after the final attempt.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, label: &str, mut op: F) -> AutomationResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AutomationResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if err.is_terminal() {
                return Err(err);
            }
            if attempt >= self.max_retries {
                return Err(AutomationError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: err.to_string(),
                });
            }
            let delay = self.delay_for(attempt);
            warn!(label, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "Attempt failed, retrying");
            sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
