//! Retry with exponential backoff

use crate::error::Transient;
use std::time::Duration;

/// How often and how patiently an operation is retried.
///
/// The delay before attempt `n + 1` is `base_delay * factor^(n - 1)`, capped
/// at `max_delay`, plus a uniformly random jitter in `[0, jitter)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately, mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        let ceiling = self.max_delay.max(self.base_delay);
        let capped = Duration::try_from_secs_f64(scaled.max(0.0))
            .map(|d| d.min(ceiling))
            .unwrap_or(ceiling);

        if self.jitter.is_zero() {
            capped
        } else {
            capped + self.jitter.mul_f64(fastrand::f64())
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// The value of an operation that eventually succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// The last error of an operation that did not succeed.
///
/// `error` is the final attempt's error, unchanged.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

impl<E> std::error::Error for RetryFailure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Decide what to do after a failed attempt.
///
/// Returns the delay before the next attempt, or `None` when the error
/// should be surfaced.
pub(crate) fn next_delay<E>(policy: &RetryPolicy, op: &str, attempt: u32, error: &E) -> Option<Duration>
where
    E: Transient + std::fmt::Display,
{
    let max = policy.attempts();
    if !error.is_transient() {
        log::debug!("'{}' failed with a permanent error: {}", op, error);
        return None;
    }
    if attempt >= max {
        log::error!("'{}' failed after {} attempts: {}", op, max, error);
        return None;
    }

    let delay = policy.backoff(attempt);
    log::warn!(
        "'{}' failed (attempt {}/{}). Retrying in {:.2}s... Error: {}",
        op,
        attempt,
        max,
        delay.as_secs_f64(),
        error
    );
    Some(delay)
}
