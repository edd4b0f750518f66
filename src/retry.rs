//! Exponential-backoff retry executor. Non-retryable errors short-circuit;
//! exhaustion wraps the last error with the operation name.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{OrchError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_multiplier,
        )
    }

    /// Delay slept before attempt `k` (1-based). The first attempt runs
    /// immediately; attempt k >= 2 waits `initial * multiplier^(k-2)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt as i32 - 2);
        self.initial_delay.mul_f64(factor)
    }

    pub async fn execute<T, F, Fut>(&self, operation: &str, mut thunk: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<OrchError> = None;

        for attempt in 1..=self.max_attempts {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            match thunk().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    warn!(operation, attempt, error = %err, "Non-retryable error, aborting");
                    return Err(err);
                }
                Err(err) => {
                    warn!(operation, attempt, error = %err, "Attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(OrchError::RetriesExhausted {
            operation: operation.to_string(),
            attempts: self.max_attempts,
            source: Box::new(last_err.unwrap_or_else(|| OrchError::Other("no attempts made".into()))),
        })
    }
}
