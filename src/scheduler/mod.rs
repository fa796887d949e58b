//! Cycle scheduling and fan-out
//!
//! The [`Scheduler`] owns one [`Pipeline`] per source. Each cycle runs all
//! of them concurrently, waits for every outcome (or the cycle timeout),
//! and logs a [`CycleReport`]. [`Scheduler::run_forever`] repeats that on
//! a fixed interval until [`Scheduler::stop`] is called.

mod report;

pub use crate::etl::SourceOutcome;
pub use report::{CycleReport, SourceReport};

use crate::config::SourceConfig;
use crate::error::PipelineError;
use crate::etl::Pipeline;
use crate::pool::{Connector, PoolManager};
use crate::publish::{Destination, Publisher};
use crate::resilience::Resilience;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timing knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Upper bound for one cycle; sources still running are aborted
    pub cycle_timeout: Option<Duration>,
    /// How long shutdown waits for checked-out connections
    pub close_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            cycle_timeout: None,
            close_grace: Duration::from_secs(10),
        }
    }
}

pub struct Scheduler<C: Connector, D: Destination> {
    pipelines: Vec<Arc<Pipeline<C, D>>>,
    pools: Arc<PoolManager<C>>,
    options: SchedulerOptions,
    cancel: CancellationToken,
    cycles: AtomicU64,
    overruns: AtomicU64,
}

impl<C: Connector, D: Destination> Scheduler<C, D> {
    /// Create a scheduler with one pipeline per source.
    ///
    /// Every source must have a pool registered in `pools`; a missing one
    /// shows up as a per-source failure on each cycle.
    pub fn new(
        sources: Vec<Arc<SourceConfig>>,
        pools: Arc<PoolManager<C>>,
        publisher: Arc<Publisher<D>>,
        resilience: Resilience,
        options: SchedulerOptions,
    ) -> Self {
        let pipelines = sources
            .into_iter()
            .map(|source| {
                Arc::new(Pipeline::new(
                    source,
                    Arc::clone(&pools),
                    Arc::clone(&publisher),
                    resilience.clone(),
                ))
            })
            .collect();

        Self {
            pipelines,
            pools,
            options,
            cancel: CancellationToken::new(),
            cycles: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    pub fn pipelines(&self) -> &[Arc<Pipeline<C, D>>] {
        &self.pipelines
    }

    pub fn pools(&self) -> &PoolManager<C> {
        &self.pools
    }

    /// Cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Cycles in [`run_forever`](Self::run_forever) that took longer than
    /// the interval.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::SeqCst)
    }

    /// Run every pipeline once, concurrently, and report the outcomes.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        log::info!(
            "Cycle {} started for {} source(s)",
            cycle,
            self.pipelines.len()
        );

        let mut tasks = JoinSet::new();
        let mut index_of = HashMap::new();
        for (index, pipeline) in self.pipelines.iter().enumerate() {
            let pipeline = Arc::clone(pipeline);
            let handle = tasks.spawn(async move { pipeline.run().await });
            index_of.insert(handle.id(), index);
        }

        let mut outcomes: Vec<Option<SourceOutcome>> =
            self.pipelines.iter().map(|_| None).collect();
        let deadline = self.options.cycle_timeout.map(|timeout| start + timeout);

        let mut timed_out = false;
        loop {
            let joined = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            timed_out = true;
                            break;
                        }
                    }
                }
                None => tasks.join_next_with_id().await,
            };
            let Some(joined) = joined else {
                break;
            };
            self.record(&index_of, &mut outcomes, joined, false);
        }

        if timed_out {
            log::error!(
                "Cycle {} timed out with {} source(s) still running, aborting them",
                cycle,
                tasks.len()
            );
            tasks.abort_all();
            while let Some(joined) = tasks.join_next_with_id().await {
                self.record(&index_of, &mut outcomes, joined, true);
            }
        }

        let sources = self
            .pipelines
            .iter()
            .zip(outcomes)
            .map(|(pipeline, outcome)| SourceReport {
                source: pipeline.source().name.clone(),
                tab: pipeline.source().tab.clone(),
                outcome: outcome.unwrap_or_else(|| SourceOutcome::Failed {
                    stage: pipeline.abandon(),
                    error: PipelineError::TimedOut,
                }),
            })
            .collect();

        let report = CycleReport {
            cycle,
            elapsed: start.elapsed(),
            sources,
        };
        report.log_summary();
        report
    }

    fn record(
        &self,
        index_of: &HashMap<tokio::task::Id, usize>,
        outcomes: &mut [Option<SourceOutcome>],
        joined: Result<(tokio::task::Id, SourceOutcome), tokio::task::JoinError>,
        aborting: bool,
    ) {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => {
                let id = e.id();
                let Some(pipeline) = index_of.get(&id).map(|&i| &self.pipelines[i]) else {
                    return;
                };
                let error = if e.is_panic() {
                    let message = panic_message(e.into_panic());
                    log::error!("[{}] Pipeline panicked: {}", pipeline.source().name, message);
                    PipelineError::Panicked(message)
                } else {
                    PipelineError::TimedOut
                };
                let stage = pipeline.abandon();
                if aborting {
                    log::error!(
                        "[{}] ✗ aborted while {} (cycle timeout)",
                        pipeline.source().name,
                        stage
                    );
                }
                (id, SourceOutcome::Failed { stage, error })
            }
        };

        if let Some(&index) = index_of.get(&id) {
            outcomes[index] = Some(outcome);
        }
    }

    /// Run a cycle now, then one every `interval` until stopped.
    ///
    /// A cycle that takes longer than `interval` is followed immediately
    /// by the next one. Stopping lets the current cycle finish, then closes
    /// all pools. Returns the number of cycles executed.
    pub async fn run_forever(&self, interval: Duration) -> u64 {
        let interval = interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Scheduler started: {} source(s), every {:?}",
            self.pipelines.len(),
            interval
        );

        let mut executed = 0;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle().await;
            executed += 1;

            if report.elapsed > interval {
                self.overruns.fetch_add(1, Ordering::SeqCst);
                log::warn!(
                    "Cycle {} took {:.2}s, longer than the {:?} interval; starting the next one now",
                    report.cycle,
                    report.elapsed.as_secs_f64(),
                    interval
                );
            }
        }

        log::info!("Scheduler stopping after {} cycle(s)", executed);
        self.shutdown().await;
        executed
    }

    /// Ask [`run_forever`](Self::run_forever) to stop after the current cycle.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops the scheduler when cancelled, for signal handlers.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close every pool with the configured grace period.
    pub async fn shutdown(&self) {
        self.pools.close_all(self.options.close_grace).await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}
