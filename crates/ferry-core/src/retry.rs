use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with linear backoff: retry `n` waits `n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Final result plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt <= self.max_retries && e.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        target_key = label,
                        attempt,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
