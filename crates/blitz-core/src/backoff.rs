//! Exponential backoff shared by every reconnect loop.

use std::future::Future;
use std::time::Duration;

use blitz_types::config::BackoffConfig;

/// Retry schedule: the delay before retry `n` (0-based) is
/// `base_delay * multiplier^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the failed attempt numbered `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted, sleeping
    /// between attempts. Returns the last error together with the number of
    /// attempts made.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, (u32, E)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let made = attempt + 1;
                    if made >= self.max_attempts {
                        tracing::error!(
                            operation = label,
                            attempts = made,
                            error = %err,
                            "giving up after final attempt"
                        );
                        return Err((made, err));
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt = made,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
        )
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }
}
