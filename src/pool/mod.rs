//! Per-source connection pooling
//!
//! One [`ConnectionPool`] per source, created once and reused every cycle.
//! A [`PooledConnection`] is checked out for a single extraction and goes
//! back to the pool when dropped, including when the owning task is
//! aborted.
//!
//! The database driver is abstracted behind [`Connector`] and
//! [`Connection`] so pools can be exercised with in-memory connections.

mod connection_pool;
mod manager;

pub use connection_pool::{ConnectionPool, PooledConnection};
pub use manager::PoolManager;

use crate::error::DbError;
use crate::etl::RowSet;
use std::future::Future;
use std::time::Duration;

/// A single open connection to a data source.
pub trait Connection: Send + Sized + 'static {
    /// Run one read statement and return its rows.
    fn query(&mut self, sql: &str) -> impl Future<Output = Result<RowSet, DbError>> + Send;

    /// Whether the connection can be handed to the next caller.
    fn is_healthy(&self) -> bool;

    /// Close the connection gracefully.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens new connections for one source.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, DbError>> + Send;
}

/// Pool sizing and acquisition limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Connections opened by [`ConnectionPool::warm_up`]
    pub min_size: u32,
    /// Upper bound on live connections
    pub max_size: u32,
    /// How long [`ConnectionPool::acquire`] waits for a free slot
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max pool size must be at least 1".to_string());
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "min pool size {} exceeds max pool size {}",
                self.min_size, self.max_size
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err("acquire timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}
