//! Bounded pool of reusable connections for one source

use super::{Connection, Connector, PoolOptions};
use crate::error::{DbError, DbErrorKind, PoolError};
use crate::etl::RowSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Bounded set of connections to a single source.
///
/// Every checked-out connection holds one semaphore permit, and new
/// connections are only opened under a permit when no idle one is
/// available, so live connections never exceed `max_size`.
///
/// Cloning is cheap: clones share the same pool.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<C: Connector> {
    name: String,
    connector: C,
    options: PoolOptions,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<C::Connection>>,
    in_use: AtomicUsize,
    live: AtomicUsize,
    closed: AtomicBool,
    released: Notify,
}

impl<C: Connector> PoolInner<C> {
    fn lock_idle(&self) -> MutexGuard<'_, Vec<C::Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new connection. The caller must hold a permit.
    async fn open(&self) -> Result<C::Connection, PoolError> {
        let connection = self
            .connector
            .connect()
            .await
            .map_err(|cause| PoolError::Connect {
                source_name: self.name.clone(),
                cause,
            })?;
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("[{}] Opened connection ({} live)", self.name, live);
        Ok(connection)
    }

    /// Put a connection back in the idle list, or hand it back if the pool
    /// has closed. The flag is read under the idle lock so a concurrent
    /// [`ConnectionPool::close`] never misses it.
    fn put_back(&self, connection: C::Connection) -> Option<C::Connection> {
        let mut idle = self.lock_idle();
        if self.closed.load(Ordering::SeqCst) {
            return Some(connection);
        }
        idle.push(connection);
        None
    }

    /// Forget a connection and close it in the background when possible.
    fn discard(&self, connection: C::Connection) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(connection.close());
            }
            Err(_) => drop(connection),
        }
    }

    fn closed_error(&self) -> PoolError {
        PoolError::Closed {
            source_name: self.name.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create an empty pool. No connection is opened until the first
    /// [`acquire`](Self::acquire) or [`warm_up`](Self::warm_up).
    pub fn new(name: impl Into<String>, connector: C, options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                connector,
                permits: Arc::new(Semaphore::new(options.max_size as usize)),
                options,
                idle: Mutex::new(Vec::new()),
                in_use: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                released: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Open connections waiting in the pool.
    pub fn idle(&self) -> usize {
        self.inner.lock_idle().len()
    }

    /// All open connections, idle or checked out.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Check out a connection, waiting up to the acquire timeout for a
    /// free slot.
    ///
    /// Idle connections are reused when healthy. Unhealthy idle
    /// connections are discarded and replaced.
    ///
    /// # Errors
    /// - [`PoolError::Timeout`] if no slot frees up in time
    /// - [`PoolError::Closed`] after [`close`](Self::close)
    /// - [`PoolError::Connect`] if a new connection cannot be opened
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(inner.closed_error());
        }

        let waited = inner.options.acquire_timeout;
        let permit = match tokio::time::timeout(waited, Arc::clone(&inner.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(inner.closed_error()),
            Err(_) => {
                log::warn!(
                    "[{}] No connection available after {:?} ({} in use)",
                    inner.name,
                    waited,
                    self.in_use()
                );
                return Err(PoolError::Timeout {
                    source_name: inner.name.clone(),
                    waited,
                });
            }
        };

        let connection = loop {
            let candidate = inner.lock_idle().pop();
            match candidate {
                Some(connection) if connection.is_healthy() => break connection,
                Some(connection) => {
                    log::debug!("[{}] Discarding unhealthy idle connection", inner.name);
                    inner.discard(connection);
                }
                None => break inner.open().await?,
            }
        };

        inner.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            connection: Some(connection),
            tainted: false,
            pool: Arc::clone(inner),
            _permit: permit,
        })
    }

    /// Open connections until `min_size` are live.
    ///
    /// Returns the number of connections opened.
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(inner.closed_error());
        }

        let target = inner.options.min_size as usize;
        let mut opened = 0;
        while self.live() < target {
            let Ok(_permit) = Arc::clone(&inner.permits).try_acquire_owned() else {
                break;
            };
            let connection = inner.open().await?;
            if let Some(connection) = inner.put_back(connection) {
                inner.discard(connection);
                return Err(inner.closed_error());
            }
            opened += 1;
        }

        Ok(opened)
    }

    /// Stop handing out connections and close the pool.
    ///
    /// Idle connections are closed right away. Checked-out connections get
    /// up to `grace` to come back; any returned later are discarded.
    pub async fn close(&self, grace: Duration) {
        let inner = &self.inner;
        let idle: Vec<_> = {
            let mut idle = inner.lock_idle();
            if inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *idle)
        };
        inner.permits.close();

        for connection in idle {
            inner.live.fetch_sub(1, Ordering::SeqCst);
            connection.close().await;
        }

        let drained = tokio::time::timeout(grace, async {
            loop {
                let released = inner.released.notified();
                if inner.in_use.load(Ordering::SeqCst) == 0 {
                    break;
                }
                released.await;
            }
        })
        .await;

        match drained {
            Ok(()) => log::debug!("[{}] Connection pool closed", inner.name),
            Err(_) => log::warn!(
                "[{}] {} connection(s) still in use after {:?}, they will be dropped on return",
                inner.name,
                self.in_use(),
                grace
            ),
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dropping the guard returns the connection to the pool. Connections that
/// failed with a connection-breaking error, report themselves unhealthy,
/// or outlive the pool are discarded instead.
pub struct PooledConnection<C: Connector> {
    connection: Option<C::Connection>,
    tainted: bool,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .field("tainted", &self.tainted)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> PooledConnection<C> {
    /// Run a statement on the checked-out connection.
    pub async fn query(&mut self, sql: &str) -> Result<RowSet, DbError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(DbError::new(
                DbErrorKind::ConnectionLost,
                "connection was discarded",
            ));
        };

        let result = connection.query(sql).await;
        if let Err(e) = &result
            && e.breaks_connection()
        {
            self.tainted = true;
        }
        result
    }

    pub fn is_healthy(&self) -> bool {
        !self.tainted && self.connection.as_ref().is_some_and(|c| c.is_healthy())
    }

    /// Replace a broken connection with a fresh one, reusing the permit
    /// this guard already holds. Healthy connections are left alone.
    pub async fn revalidate(&mut self) -> Result<(), PoolError> {
        if self.is_healthy() {
            return Ok(());
        }
        if self.pool.closed.load(Ordering::SeqCst) {
            return Err(self.pool.closed_error());
        }

        if let Some(stale) = self.connection.take() {
            log::debug!("[{}] Replacing broken connection", self.pool.name);
            self.pool.live.fetch_sub(1, Ordering::SeqCst);
            stale.close().await;
        }
        self.tainted = false;
        self.connection = Some(self.pool.open().await?);
        Ok(())
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let pool = &self.pool;
        if let Some(connection) = self.connection.take() {
            let leftover = if !self.tainted && connection.is_healthy() {
                pool.put_back(connection)
            } else {
                Some(connection)
            };
            if let Some(connection) = leftover {
                pool.discard(connection);
            }
        }
        pool.in_use.fetch_sub(1, Ordering::SeqCst);
        pool.released.notify_waiters();
        // The permit is released after this body runs, once the
        // connection is already back in the idle list.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::Cell;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counters {
        opened: AtomicU32,
        closed: AtomicU32,
    }

    struct TestConnector {
        counters: Arc<Counters>,
        fail_connect: bool,
    }

    struct TestConnection {
        counters: Arc<Counters>,
        healthy: bool,
    }

    impl Connection for TestConnection {
        async fn query(&mut self, sql: &str) -> Result<RowSet, DbError> {
            if sql == "BREAK" {
                return Err(DbError::new(DbErrorKind::ConnectionLost, "reset by peer"));
            }
            Ok(RowSet {
                columns: vec!["answer".to_string()],
                rows: vec![vec![Cell::Int(42)]],
            })
        }

        fn is_healthy(&self) -> bool {
            self.healthy
        }

        async fn close(self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Connector for TestConnector {
        type Connection = TestConnection;

        async fn connect(&self) -> Result<TestConnection, DbError> {
            if self.fail_connect {
                return Err(DbError::new(DbErrorKind::Connect, "refused"));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(TestConnection {
                counters: Arc::clone(&self.counters),
                healthy: true,
            })
        }
    }

    fn pool(max_size: u32, acquire_timeout: Duration) -> (ConnectionPool<TestConnector>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let connector = TestConnector {
            counters: Arc::clone(&counters),
            fail_connect: false,
        };
        let options = PoolOptions {
            min_size: max_size.min(1),
            max_size,
            acquire_timeout,
        };
        (ConnectionPool::new("test", connector, options), counters)
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let (pool, counters) = pool(2, Duration::from_secs(1));

        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            let rows = conn.query("SELECT 42").await.unwrap();
            assert_eq!(rows.rows.len(), 1);
            assert_eq!(pool.in_use(), 1);
        }

        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_then_times_out() {
        let (pool, _) = pool(1, Duration::from_secs(5));
        let held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout { waited, .. } if waited == Duration::from_secs(5)));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_wakes_when_released() {
        let (pool, _) = pool(1, Duration::from_secs(5));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(pool.live(), 1);
    }

    #[tokio::test]
    async fn test_live_never_exceeds_max() {
        let (pool, counters) = pool(3, Duration::from_secs(5));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let _conn = pool.acquire().await.unwrap();
                assert!(pool.live() <= 3);
                tokio::task::yield_now().await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(counters.opened.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_broken_connection_is_discarded() {
        let (pool, counters) = pool(2, Duration::from_secs(1));

        {
            let mut conn = pool.acquire().await.unwrap();
            assert!(conn.query("BREAK").await.is_err());
            assert!(!conn.is_healthy());
        }
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.live(), 0);

        tokio::task::yield_now().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revalidate_replaces_broken_connection() {
        let (pool, counters) = pool(1, Duration::from_secs(1));

        let mut conn = pool.acquire().await.unwrap();
        let _ = conn.query("BREAK").await;
        conn.revalidate().await.unwrap();

        assert!(conn.is_healthy());
        assert!(conn.query("SELECT 42").await.is_ok());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.live(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = TestConnector {
            counters: Arc::new(Counters::default()),
            fail_connect: true,
        };
        let pool = ConnectionPool::new("down", connector, PoolOptions::default());

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.live(), 0);
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_size() {
        let counters = Arc::new(Counters::default());
        let connector = TestConnector {
            counters: Arc::clone(&counters),
            fail_connect: false,
        };
        let options = PoolOptions {
            min_size: 2,
            max_size: 4,
            acquire_timeout: Duration::from_secs(1),
        };
        let pool = ConnectionPool::new("warm", connector, options);

        assert_eq!(pool.warm_up().await.unwrap(), 2);
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.warm_up().await.unwrap(), 0);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_checked_out_connections() {
        let (pool, counters) = pool(2, Duration::from_secs(1));
        let idle = pool.acquire().await.unwrap();
        let held = pool.acquire().await.unwrap();
        drop(idle);

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(held);
        });

        let start = tokio::time::Instant::now();
        pool.close(Duration::from_secs(10)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        releaser.await.unwrap();

        assert!(pool.is_closed());
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.in_use(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed { .. })));

        tokio::task::yield_now().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gives_up_after_grace() {
        let (pool, _) = pool(1, Duration::from_secs(1));
        let held = pool.acquire().await.unwrap();

        let start = tokio::time::Instant::now();
        pool.close(Duration::from_secs(3)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(pool.in_use(), 1);

        // Late return is dropped, not pooled
        drop(held);
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.live(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_returns_racing_close_are_not_pooled() {
        for _ in 0..50 {
            let (pool, _) = pool(4, Duration::from_secs(1));
            let mut held = Vec::new();
            for _ in 0..4 {
                held.push(pool.acquire().await.unwrap());
            }

            let returns: Vec<_> = held
                .into_iter()
                .map(|conn| tokio::spawn(async move { drop(conn) }))
                .collect();
            pool.close(Duration::from_secs(5)).await;
            for task in returns {
                task.await.unwrap();
            }

            assert_eq!(pool.in_use(), 0);
            assert_eq!(pool.idle(), 0);
            assert_eq!(pool.live(), 0);
        }
    }
}
