//! Bounded retry loop used when dialing the broker.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default delay between dial attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default number of dial attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed,
    /// Delay doubles after every failure, capped at `max`.
    Exponential { max: Duration },
}

/// Retry policy for an operation that may fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Switch to exponential backoff capped at `max`.
    pub fn with_exponential_backoff(mut self, max: Duration) -> Self {
        self.backoff = Backoff::Exponential { max };
        self
    }

    /// Number of attempts actually made. Always at least one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Final failure of a retried operation.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub last: E,
}

/// Run `operation` until it succeeds or the policy runs out of attempts.
///
/// The closure receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(last) if attempt >= attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last,
                })
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Attempt {}/{} failed: {}, retrying in {:?}",
                    attempt, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
