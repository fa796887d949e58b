//! Error taxonomy for the sync engine
//!
//! Every component below the pipeline returns one of these typed errors.
//! The pipeline converts them into a per-source outcome, so only
//! [`ConfigError`] ever stops the process.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Classifies whether an error is worth retrying.
///
/// Timeouts, dropped connections and quota rejections are transient.
/// Validation, authentication and malformed-query errors are not.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no enabled sources configured")]
    NoSources,

    #[error("source '{0}' is defined more than once")]
    DuplicateSource(String),

    #[error("tab '{tab}' is targeted by both '{first}' and '{second}'")]
    DuplicateTab {
        tab: String,
        first: String,
        second: String,
    },

    #[error("source '{source_name}': {reason}")]
    InvalidSource { source_name: String, reason: String },
}

/// What went wrong talking to a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Could not open a connection
    Connect,
    /// An established connection broke mid-operation
    ConnectionLost,
    /// The statement exceeded its timeout
    Timeout,
    /// The server rejected the statement
    Query,
    /// A returned value could not be decoded
    Decode,
}

impl std::fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::ConnectionLost => "connection lost",
            Self::Timeout => "timeout",
            Self::Query => "query",
            Self::Decode => "decode",
        };
        write!(f, "{}", name)
    }
}

/// Error reported by a database client.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the connection that produced this error should be discarded.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self.kind,
            DbErrorKind::Connect | DbErrorKind::ConnectionLost | DbErrorKind::Timeout
        )
    }
}

impl Transient for DbError {
    fn is_transient(&self) -> bool {
        self.breaks_connection()
    }
}

/// Error acquiring a pooled connection.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {waited:?} waiting for a connection to '{source_name}'")]
    Timeout {
        source_name: String,
        waited: Duration,
    },

    #[error("connection pool for '{source_name}' is closed")]
    Closed { source_name: String },

    #[error("failed to connect to '{source_name}': {cause}")]
    Connect {
        source_name: String,
        #[source]
        cause: DbError,
    },

    #[error("no connection pool registered for source '{0}'")]
    UnknownSource(String),
}

/// A query against a source failed.
#[derive(Debug, Error)]
#[error("extraction from '{source_name}' failed: {cause}")]
pub struct ExtractionError {
    pub source_name: String,
    #[source]
    pub cause: DbError,
}

impl ExtractionError {
    pub fn new(source_name: impl Into<String>, cause: DbError) -> Self {
        Self {
            source_name: source_name.into(),
            cause,
        }
    }
}

impl Transient for ExtractionError {
    fn is_transient(&self) -> bool {
        self.cause.is_transient()
    }
}

/// Error reported by the destination API client.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("rate limited by destination: {0}")]
    RateLimited(String),

    #[error("destination request timed out")]
    Timeout,

    #[error("connection to destination failed: {0}")]
    Connection(String),

    #[error("destination unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("destination rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("destination rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected destination response: {0}")]
    Protocol(String),
}

impl Transient for DestinationError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout | Self::Connection(_) | Self::Unavailable { .. }
        )
    }
}

/// A publish could not be completed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to '{tab}' failed after {attempts} attempt(s): {cause}")]
    Failed {
        tab: String,
        attempts: u32,
        #[source]
        cause: DestinationError,
    },

    #[error("tab '{0}' already has a publish in flight")]
    TabBusy(String),
}

/// Coarse error category recorded in cycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PoolTimeout,
    Pool,
    Extraction,
    Transform,
    Publish,
    Overlap,
    TimedOut,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PoolTimeout => "PoolTimeout",
            Self::Pool => "PoolError",
            Self::Extraction => "ExtractionError",
            Self::Transform => "TransformError",
            Self::Publish => "PublishError",
            Self::Overlap => "Overlap",
            Self::TimedOut => "TimedOut",
            Self::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

/// Why a single source's pipeline did not complete.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{cause} (after {attempts} attempt(s))")]
    Extraction {
        attempts: u32,
        #[source]
        cause: ExtractionError,
    },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("previous run for this source has not finished")]
    Overlap,

    #[error("cycle timed out before the pipeline finished")]
    TimedOut,

    #[error("pipeline task panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Pool(PoolError::Timeout { .. }) => ErrorKind::PoolTimeout,
            Self::Pool(_) => ErrorKind::Pool,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Transform(_) => ErrorKind::Transform,
            Self::Publish(_) => ErrorKind::Publish,
            Self::Overlap => ErrorKind::Overlap,
            Self::TimedOut => ErrorKind::TimedOut,
            Self::Panicked(_) => ErrorKind::Internal,
        }
    }

    /// Attempts spent before giving up, where the stage retries.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Extraction { attempts, .. } => *attempts,
            Self::Publish(PublishError::Failed { attempts, .. }) => *attempts,
            _ => 1,
        }
    }
}
