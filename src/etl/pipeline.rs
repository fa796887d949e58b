//! Per-source pipeline: acquire → extract → transform → publish

use super::{ExtractionResult, Extractor, Transformer};
use crate::config::SourceConfig;
use crate::error::{DbError, DbErrorKind, ExtractionError, PipelineError, PoolError};
use crate::pool::{Connector, PoolManager, PooledConnection};
use crate::publish::{Destination, PublishRequest, Publisher};
use crate::resilience::Resilience;
use crate::transform::{TIMESTAMP_FORMAT, TabTransform};
use std::sync::{Arc, Mutex};

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Acquiring,
    Extracting,
    Transforming,
    Publishing,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Result of one pipeline run.
#[derive(Debug)]
pub enum SourceOutcome {
    Succeeded {
        /// Data rows published, header excluded
        rows: usize,
        extract_attempts: u32,
        publish_attempts: u32,
    },
    Failed {
        /// Stage the run was in when it failed
        stage: PipelineState,
        error: PipelineError,
    },
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

/// Everything one extraction attempt needs, borrowed for the retry loop.
struct ExtractAttempt<'p, C: Connector> {
    connection: &'p mut PooledConnection<C>,
    extractor: &'p Extractor,
    query: &'p str,
}

impl<C: Connector> ExtractAttempt<'_, C> {
    async fn run(&mut self) -> Result<ExtractionResult, ExtractionError> {
        // A previous attempt may have broken the connection
        self.connection.revalidate().await.map_err(|e| {
            ExtractionError::new(self.extractor.source_name(), revalidation_cause(e))
        })?;
        self.extractor.extract(self.connection, self.query).await
    }
}

fn revalidation_cause(error: PoolError) -> DbError {
    match error {
        PoolError::Connect { cause, .. } => cause,
        other => DbError::new(DbErrorKind::Connect, other.to_string()),
    }
}

/// The long-lived slot for one source.
///
/// Created once at startup and run once per cycle. At most one run is in
/// flight at a time: a run that finds the slot busy fails immediately with
/// [`PipelineError::Overlap`] instead of queueing.
pub struct Pipeline<C: Connector, D: Destination> {
    source: Arc<SourceConfig>,
    pools: Arc<PoolManager<C>>,
    publisher: Arc<Publisher<D>>,
    resilience: Resilience,
    extractor: Extractor,
    transform: TabTransform,
    state: Mutex<PipelineState>,
    running: tokio::sync::Mutex<()>,
}

impl<C: Connector, D: Destination> Pipeline<C, D> {
    pub fn new(
        source: Arc<SourceConfig>,
        pools: Arc<PoolManager<C>>,
        publisher: Arc<Publisher<D>>,
        resilience: Resilience,
    ) -> Self {
        Self {
            extractor: Extractor::new(&source.name),
            transform: TabTransform::new(source.layout.column_range.width(), source.cache_capacity),
            source,
            pools,
            publisher,
            resilience,
            state: Mutex::new(PipelineState::Idle),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Current state of the latest run.
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != next {
            log::debug!("[{}] {} → {}", self.source.name, *state, next);
            *state = next;
        }
    }

    /// Record that a run was cancelled from outside and return the stage
    /// it had reached.
    pub fn abandon(&self) -> PipelineState {
        let stage = self.state();
        self.set_state(PipelineState::Failed);
        stage
    }

    /// Run the pipeline once. Never returns an error: every failure is
    /// folded into the outcome.
    pub async fn run(&self) -> SourceOutcome {
        let Ok(_slot) = self.running.try_lock() else {
            let stage = self.state();
            log::warn!(
                "[{}] Previous run still {}, skipping this cycle",
                self.source.name,
                stage
            );
            return SourceOutcome::Failed {
                stage,
                error: PipelineError::Overlap,
            };
        };

        match self.execute().await {
            Ok(outcome) => {
                self.set_state(PipelineState::Done);
                outcome
            }
            Err(error) => {
                let stage = self.state();
                self.set_state(PipelineState::Failed);
                log::error!("[{}] ✗ failed while {}: {}", self.source.name, stage, error);
                SourceOutcome::Failed { stage, error }
            }
        }
    }

    async fn execute(&self) -> Result<SourceOutcome, PipelineError> {
        let source = &self.source;

        self.set_state(PipelineState::Acquiring);
        let mut connection = self.pools.acquire(&source.name).await?;

        self.set_state(PipelineState::Extracting);
        let op = format!("extract '{}'", source.name);
        let mut attempt = ExtractAttempt {
            connection: &mut connection,
            extractor: &self.extractor,
            query: &source.query,
        };
        let extracted = self
            .resilience
            .run_with(&op, &mut attempt, |attempt| Box::pin(attempt.run()))
            .await
            .map_err(|failure| PipelineError::Extraction {
                attempts: failure.attempts,
                cause: failure.error,
            })?;
        // Give the connection back before the slow part
        drop(connection);

        self.set_state(PipelineState::Transforming);
        let rows = extracted.value.row_count();
        let values = self
            .transform
            .transform(extracted.value)
            .map_err(|e| PipelineError::Transform(format!("{:#}", e)))?;

        self.set_state(PipelineState::Publishing);
        let request = PublishRequest {
            tab: source.tab.clone(),
            values,
            layout: source.layout.clone(),
            status: source
                .layout
                .status_cell
                .as_ref()
                .map(|_| status_line(&source.tab, rows)),
        };
        let published = self.publisher.publish(&request).await?;
        log::debug!(
            "[{}] Publish queued {:?} for quota, sent in {:?}",
            source.name,
            published.value.queued,
            published.value.sent
        );

        log::info!(
            "[{}] ✓ {} row(s) → '{}' (extract attempts: {}, publish attempts: {})",
            source.name,
            rows,
            source.tab,
            extracted.attempts,
            published.attempts
        );

        Ok(SourceOutcome::Succeeded {
            rows,
            extract_attempts: extracted.attempts,
            publish_attempts: published.attempts,
        })
    }
}

/// "Last updated" line written next to a tab's data.
pub fn status_line(tab: &str, rows: usize) -> String {
    format!(
        "{} | {} | records: {}",
        chrono::Local::now().format(TIMESTAMP_FORMAT),
        tab,
        rows
    )
}
