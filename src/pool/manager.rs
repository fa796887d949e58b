//! One connection pool per configured source

use super::{ConnectionPool, Connector, PoolOptions, PooledConnection};
use crate::error::PoolError;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;

/// Registry of per-source pools.
///
/// Pools are registered once at startup and reused by every cycle.
pub struct PoolManager<C: Connector> {
    pools: HashMap<String, ConnectionPool<C>>,
    order: Vec<String>,
}

impl<C: Connector> Default for PoolManager<C> {
    fn default() -> Self {
        Self {
            pools: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<C: Connector> PoolManager<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the pool for a source, replacing any earlier registration.
    pub fn register(
        &mut self,
        source: impl Into<String>,
        connector: C,
        options: PoolOptions,
    ) -> &ConnectionPool<C> {
        let source = source.into();
        if !self.pools.contains_key(&source) {
            self.order.push(source.clone());
        }
        self.pools
            .entry(source.clone())
            .insert_entry(ConnectionPool::new(source, connector, options))
            .into_mut()
    }

    /// Check out a connection for `source`.
    pub async fn acquire(&self, source: &str) -> Result<PooledConnection<C>, PoolError> {
        self.pool(source)?.acquire().await
    }

    pub fn pool(&self, source: &str) -> Result<&ConnectionPool<C>, PoolError> {
        self.pools
            .get(source)
            .ok_or_else(|| PoolError::UnknownSource(source.to_string()))
    }

    /// Source names in registration order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Warm every pool concurrently.
    ///
    /// Failures are logged and returned but never abort the others: a
    /// source that is down at startup is retried on every cycle anyway.
    pub async fn warm_up_all(&self) -> Vec<(String, Result<usize, PoolError>)> {
        let results = join_all(self.order.iter().filter_map(|name| {
            let pool = self.pools.get(name)?;
            Some(async move { (name.clone(), pool.warm_up().await) })
        }))
        .await;

        for (name, result) in &results {
            match result {
                Ok(opened) => log::debug!("[{}] Warmed up {} connection(s)", name, opened),
                Err(e) => log::warn!("[{}] Warm-up failed: {}", name, e),
            }
        }
        results
    }

    /// Close every pool, giving checked-out connections up to `grace` to
    /// come back.
    pub async fn close_all(&self, grace: Duration) {
        join_all(self.pools.values().map(|pool| pool.close(grace))).await;
        log::info!("Closed {} connection pool(s)", self.pools.len());
    }
}
