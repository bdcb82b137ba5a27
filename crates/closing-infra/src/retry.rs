//! Retry policies for idempotent external calls.
//!
//! Only calculation and control handlers are retried; the policy caps the
//! attempt count and applies exponential backoff with jitter so bursts of
//! failing calls do not synchronize.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 means a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Exponential multiplier between attempts.
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Policy for non-idempotent operations.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Backoff delay for a 1-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self
            .initial_delay
            .mul_f64(self.multiplier.powi((attempt - 1) as i32))
            .min(self.max_delay);

        if self.jitter_factor <= 0.0 {
            return base;
        }

        let mut rng = rand::thread_rng();
        let spread = base.mul_f64(self.jitter_factor);
        let jitter = rng.gen_range(Duration::ZERO..spread.max(Duration::from_nanos(1)));
        if rng.gen_bool(0.5) {
            base + jitter
        } else {
            base.saturating_sub(jitter)
        }
    }
}

/// Run `operation` under `policy`, retrying while `should_retry` accepts
/// the error and the retry budget lasts.
pub async fn retry_with<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.max_retries || !should_retry(&e) {
                    return Err(e);
                }

                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
