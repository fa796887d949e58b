//! Shared, quota-aware publisher

use super::QuotaLimiter;
use crate::config::TabLayout;
use crate::error::{DestinationError, PublishError};
use crate::resilience::{Resilience, Retried, timed};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// One full replacement of a tab's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub tab: String,
    /// Header row first
    pub values: Vec<Vec<String>>,
    pub layout: TabLayout,
    /// Written to `layout.status_cell` when both are set
    pub status: Option<String>,
}

impl PublishRequest {
    /// Number of data rows, header excluded.
    pub fn row_count(&self) -> usize {
        self.values.len().saturating_sub(1)
    }
}

/// Spreadsheet-like service that accepts whole-tab writes.
pub trait Destination: Send + Sync + 'static {
    /// Replace the tab's data with the request's values.
    fn replace_tab(
        &self,
        request: &PublishRequest,
    ) -> impl Future<Output = Result<(), DestinationError>> + Send;

    /// Number of API requests one [`replace_tab`](Self::replace_tab) call
    /// consumes from the quota.
    fn request_cost(&self, _request: &PublishRequest) -> u32 {
        1
    }
}

/// Where the successful attempt of a publish spent its time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishTiming {
    /// Waiting for quota admission
    pub queued: Duration,
    /// The destination call itself
    pub sent: Duration,
}

/// Sends publish requests from every pipeline through one quota.
///
/// Each attempt waits for admission, then calls the destination. A failed
/// attempt gives up its place and queues again behind everyone else after
/// its backoff. The slow-call threshold applies to the destination call
/// only, not to time spent queued for the quota.
pub struct Publisher<D: Destination> {
    destination: D,
    limiter: QuotaLimiter,
    retry: Resilience,
    slow_threshold: Option<Duration>,
    in_flight: Mutex<HashSet<String>>,
}

impl<D: Destination> Publisher<D> {
    pub fn new(destination: D, limiter: QuotaLimiter, resilience: Resilience) -> Self {
        let slow_threshold = resilience.slow_threshold;
        Self {
            destination,
            limiter,
            retry: Resilience::new(resilience.policy, None),
            slow_threshold,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn limiter(&self) -> &QuotaLimiter {
        &self.limiter
    }

    /// Publish one request, retrying transient destination errors.
    ///
    /// # Errors
    /// - [`PublishError::TabBusy`] if another publish to the same tab is
    ///   still running
    /// - [`PublishError::Failed`] once retries are exhausted or the error
    ///   is permanent
    pub async fn publish(
        &self,
        request: &PublishRequest,
    ) -> Result<Retried<PublishTiming>, PublishError> {
        let Some(_lease) = TabLease::acquire(&self.in_flight, &request.tab) else {
            log::warn!("Publish to '{}' rejected: tab is busy", request.tab);
            return Err(PublishError::TabBusy(request.tab.clone()));
        };

        let cost = self.destination.request_cost(request).max(1);
        let op = format!("publish '{}'", request.tab);
        let label = op.as_str();

        self.retry
            .run(&op, || async move {
                let queued = self.limiter.admit(cost).await;
                let start = Instant::now();
                timed(label, self.slow_threshold, self.destination.replace_tab(request)).await?;
                Ok::<_, DestinationError>(PublishTiming {
                    queued,
                    sent: start.elapsed(),
                })
            })
            .await
            .map_err(|failure| PublishError::Failed {
                tab: request.tab.clone(),
                attempts: failure.attempts,
                cause: failure.error,
            })
    }
}

/// Marks a tab as having a publish in flight until dropped.
struct TabLease<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    tab: String,
}

impl<'a> TabLease<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, tab: &str) -> Option<Self> {
        if !lock(in_flight).insert(tab.to_string()) {
            return None;
        }
        Some(Self {
            in_flight,
            tab: tab.to_string(),
        })
    }
}

impl Drop for TabLease<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.tab);
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
