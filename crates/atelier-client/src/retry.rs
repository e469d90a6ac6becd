//! Generic retry-with-backoff driver.
//!
//! Exponential backoff with a max-delay cap and optional jitter. The caller
//! supplies the retryability predicate; the driver never inspects errors
//! itself.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay. Delay for attempt `n` is `base * 2^(n-1)`, capped.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// When true, each delay is perturbed by up to ±`jitter_factor`.
    pub jitter: bool,
    /// Fraction of the delay used as the jitter range, clamped to [0, 1].
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay before re-running attempt `attempt + 1`.
    ///
    /// Attempts are 1-indexed; the exponent is computed with a checked shift
    /// so large attempt numbers saturate at `max_delay` instead of wrapping.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let factor = self.jitter_factor.clamp(0.0, 1.0);
        if factor == 0.0 {
            return capped;
        }

        let perturbation: f64 = rand::rng().random_range(-factor..=factor);
        let jittered_ms = (capped.as_millis() as f64 * (1.0 + perturbation)).max(0.0);
        Duration::from_millis(jittered_ms as u64).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts the policy's attempts, sleeping the computed backoff between
/// attempts. The last error is propagated on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
