//! Bounded exponential backoff for page requests

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{ReleaseError, ReleaseResult};
use crate::infrastructure::config::FetchConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(fetch: &FetchConfig) -> Self {
        Self {
            max_attempts: fetch.max_attempts.max(1),
            initial_delay: Duration::from_millis(fetch.initial_backoff_ms),
            multiplier: fetch.backoff_multiplier,
            max_delay: Duration::from_millis(fetch.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let millis = self.initial_delay.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// Cancellation during a backoff sleep returns [`ReleaseError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> ReleaseResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ReleaseResult<T>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ReleaseError::Cancelled);
            }

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt + 1 >= self.max_attempts => {
                    warn!("{} failed after {} attempts: {}", label, attempt + 1, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return Err(ReleaseError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }
}
