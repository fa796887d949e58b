//! tabsync
//!
//! Periodically runs one query per configured PostgreSQL source and
//! replaces a Google Sheets tab with the result.
//!
//! Each cycle fans out one [`Pipeline`] per source: acquire a pooled
//! connection, extract, transform into display strings, then publish
//! through a single quota-aware [`Publisher`]. A failing source never
//! takes down the others.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod etl;
pub mod pool;
pub mod publish;
pub mod resilience;
pub mod scheduler;
pub mod transform;

// Re-exports for convenience
pub use client::{Auth, PgConnector, SheetsClient};
pub use config::{Settings, SourceConfig, SourcesFile};
pub use error::{
    ConfigError, DbError, DbErrorKind, DestinationError, ErrorKind, PipelineError, PoolError,
    PublishError,
};
pub use etl::{Extractor, Pipeline, SourceOutcome, Transformer};
pub use pool::{ConnectionPool, PoolManager};
pub use publish::{Publisher, QuotaLimiter};
pub use resilience::{Resilience, RetryPolicy};
pub use scheduler::{CycleReport, Scheduler, SchedulerOptions};
