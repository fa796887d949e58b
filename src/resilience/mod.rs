//! Cross-cutting retry, timing and caching
//!
//! [`Resilience`] wraps an asynchronous operation so that every attempt is
//! individually timed and transient failures are retried with backoff:
//!
//! ```text
//! retry loop ─┬─ timed(attempt 1) ─ operation
//!             ├─ timed(attempt 2) ─ operation
//!             └─ ...
//! ```
//!
//! [`ResultCache`] is the memoizer for deterministic transform steps.

mod cache;
mod retry;
mod timing;

pub use cache::ResultCache;
pub use retry::{Retried, RetryFailure, RetryPolicy};
pub use timing::timed;

use crate::error::Transient;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

/// Retry policy plus slow-call threshold, applied around an operation.
#[derive(Debug, Clone, Default)]
pub struct Resilience {
    pub policy: RetryPolicy,
    /// Attempts slower than this are logged at warn level
    pub slow_threshold: Option<Duration>,
}

impl Resilience {
    pub fn new(policy: RetryPolicy, slow_threshold: Option<Duration>) -> Self {
        Self {
            policy,
            slow_threshold,
        }
    }

    /// Run a stateless operation with retries.
    ///
    /// # Example
    /// ```
    /// use tabsync::resilience::{Resilience, RetryPolicy};
    /// use tabsync::{DbError, DbErrorKind};
    ///
    /// # async fn example() {
    /// let resilience = Resilience::new(RetryPolicy::immediate(3), None);
    /// let mut calls = 0;
    /// let result = resilience
    ///     .run("flaky", || {
    ///         calls += 1;
    ///         let outcome = if calls < 2 {
    ///             Err(DbError::new(DbErrorKind::Timeout, "slow"))
    ///         } else {
    ///             Ok(calls)
    ///         };
    ///         async move { outcome }
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(result.attempts, 2);
    /// # }
    /// ```
    pub async fn run<T, E, F, Fut>(&self, op: &str, mut f: F) -> Result<Retried<T>, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let label = format!("{} (attempt {})", op, attempt);
            match timed(&label, self.slow_threshold, f()).await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => match retry::next_delay(&self.policy, op, attempt, &error) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                        });
                    }
                },
            }
        }
    }

    /// Run an operation that needs exclusive access to some state between
    /// attempts, such as a checked-out connection.
    pub async fn run_with<S, T, E, F>(
        &self,
        op: &str,
        state: &mut S,
        mut f: F,
    ) -> Result<Retried<T>, RetryFailure<E>>
    where
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let label = format!("{} (attempt {})", op, attempt);
            match timed(&label, self.slow_threshold, f(state)).await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => match retry::next_delay(&self.policy, op, attempt, &error) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                        });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DbError, DbErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> DbError {
        DbError::new(DbErrorKind::ConnectionLost, "connection reset")
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let resilience = Resilience::default();
        let calls = AtomicU32::new(0);

        let result = resilience
            .run("flaky", || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(transient()),
                    _ => Ok("rows"),
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "rows");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_surfaces_last_error() {
        let resilience = Resilience::default();
        let calls = AtomicU32::new(0);

        let failure = resilience
            .run("broken", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(DbError::new(DbErrorKind::Timeout, format!("attempt {}", n)))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.message, "attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let resilience = Resilience::default();
        let calls = AtomicU32::new(0);

        let failure = resilience
            .run("bad query", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(DbError::new(DbErrorKind::Query, "syntax error"))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let resilience = Resilience::new(policy, None);
        let start = tokio::time::Instant::now();

        let _ = resilience
            .run("slow retry", || async { Err::<(), _>(transient()) })
            .await;

        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_run_with_mutable_state() {
        let resilience = Resilience::new(RetryPolicy::immediate(3), None);
        let mut log: Vec<u32> = Vec::new();

        let result = resilience
            .run_with("stateful", &mut log, |log| {
                Box::pin(async move {
                    log.push(log.len() as u32);
                    if log.len() < 2 {
                        Err(transient())
                    } else {
                        Ok(log.len())
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(result.value, 2);
        assert_eq!(result.attempts, 2);
        assert_eq!(log, vec![0, 1]);
    }
}
