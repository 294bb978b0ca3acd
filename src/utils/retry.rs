// Exponential-backoff retry.
//
// Delay grows by `multiplier` per attempt, bounded by `max_delay`, with
// optional proportional jitter. An error may opt out of retries via
// `AppError::is_retryable`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized on top (0.0 disables jitter).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let mut delay = raw.min(self.max_delay.as_secs_f64());
        if self.jitter > 0.0 {
            let spread = delay * self.jitter;
            delay += rand::rng().random_range(0.0..=spread);
        }
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Retry an async operation. `operation` is called fresh per attempt.
pub async fn retry_async<T, F, Fut>(config: &RetryConfig, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && err.is_retryable() => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = name,
                    attempt = attempt + 1,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Blocking variant for synchronous call sites.
pub fn retry_sync<T, F>(config: &RetryConfig, name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && err.is_retryable() => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = name,
                    attempt = attempt + 1,
                    error = %err,
                    "retrying after failure"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
