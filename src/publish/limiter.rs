//! Destination quota pacing

use crate::error::ConfigError;
use governor::{Quota, RateLimiter};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Requests allowed per window by the destination API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    pub requests: u32,
    pub window: Duration,
}

impl Default for QuotaConfig {
    /// Google Sheets' per-user write quota
    fn default() -> Self {
        Self {
            requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl QuotaConfig {
    /// Spacing between two admitted requests, rounded up to the next
    /// nanosecond.
    pub fn period(&self) -> Duration {
        let nanos = self.window.as_nanos().div_ceil(u128::from(self.requests.max(1)));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.requests == 0 {
            return Err("quota must allow at least one request".to_string());
        }
        if self.period().is_zero() {
            return Err(format!(
                "{} requests per {:?} is too fine-grained to pace",
                self.requests, self.window
            ));
        }
        Ok(())
    }
}

/// Shared pacing for every request sent to the destination.
///
/// Requests are spread evenly, one per `window / requests`, with no
/// burst allowance. On top of that pacing, the last `requests` admission
/// times are kept and a request is held until the oldest of them is a
/// full window old, so no rolling window ever admits more than the quota.
/// Waiting callers are admitted in the order they arrived.
pub struct QuotaLimiter {
    config: QuotaConfig,
    limiter: DirectRateLimiter,
    /// Recent admission times, oldest first
    admission: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl QuotaLimiter {
    pub fn new(config: QuotaConfig) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            key: "QUOTA_REQUESTS",
            value: config.requests.to_string(),
            reason,
        };
        config.validate().map_err(invalid)?;
        let quota = Quota::with_period(config.period())
            .ok_or_else(|| invalid("quota period must be greater than zero".to_string()))?;

        Ok(Self {
            config,
            limiter: RateLimiter::direct(quota),
            admission: tokio::sync::Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Wait until `cost` requests may be sent.
    ///
    /// Returns how long the caller waited.
    pub async fn admit(&self, cost: u32) -> Duration {
        self.admit_at(cost).await.1
    }

    /// Like [`admit`](Self::admit), also returning when the last of the
    /// `cost` requests was admitted.
    pub async fn admit_at(&self, cost: u32) -> (Instant, Duration) {
        let start = Instant::now();
        // tokio's Mutex queues waiters fairly, which gives FIFO admission
        let mut recent = self.admission.lock().await;
        let capacity = self.config.requests.max(1) as usize;
        let mut admitted = start;
        for _ in 0..cost.max(1) {
            self.limiter.until_ready().await;
            if recent.len() >= capacity
                && let Some(oldest) = recent.pop_front()
            {
                tokio::time::sleep_until(oldest + self.config.window).await;
            }
            admitted = Instant::now();
            recent.push_back(admitted);
        }
        let waited = admitted - start;
        if waited >= self.config.period() {
            log::debug!("Quota limiter held a request for {:?}", waited);
        }
        (admitted, waited)
    }
}
