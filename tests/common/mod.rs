//! Shared fixtures: in-memory sources and a recording destination

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabsync::config::{ColumnRange, ConnectionParams, SourceConfig, TabLayout};
use tabsync::error::{DbError, DbErrorKind, DestinationError};
use tabsync::etl::{Cell, RowSet};
use tabsync::pool::{Connection, Connector, PoolManager, PoolOptions};
use tabsync::publish::{Destination, PublishRequest, Publisher, QuotaConfig, QuotaLimiter};
use tabsync::resilience::{Resilience, RetryPolicy};
use tabsync::scheduler::{Scheduler, SchedulerOptions};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a fake database returns for its query.
#[derive(Default)]
pub struct Script {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// Fail this many leading queries with a dropped connection
    pub transient_failures: AtomicU32,
    /// Fail every query with a syntax error
    pub broken_query: bool,
    pub delay: Duration,
    /// Only the first this many queries are delayed; all of them when unset
    pub slow_queries: Option<u32>,
    pub queries: AtomicU32,
    pub connects: AtomicU32,
    /// When each query started and returned
    pub started: Mutex<Vec<Instant>>,
    pub finished: Mutex<Vec<Instant>>,
    /// Cancel the token once this many queries have started
    pub stop_after: Mutex<Option<(u32, CancellationToken)>>,
}

impl Script {
    /// `rows` rows of `id, username, created_at`.
    pub fn users(rows: usize) -> Self {
        let created = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Self {
            columns: vec!["id".into(), "username".into(), "created_at".into()],
            rows: (1..=rows)
                .map(|i| {
                    vec![
                        Cell::Int(i as i64),
                        Cell::Text(format!("user{}", i)),
                        Cell::Timestamp(created),
                    ]
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_slow_queries(mut self, count: u32, delay: Duration) -> Self {
        self.slow_queries = Some(count);
        self.delay = delay;
        self
    }

    pub fn stop_after(&self, queries: u32, token: CancellationToken) {
        *self.stop_after.lock().unwrap() = Some((queries, token));
    }

    pub fn with_broken_query(mut self) -> Self {
        self.broken_query = true;
        self
    }
}

#[derive(Clone)]
pub struct MockConnector {
    pub script: Arc<Script>,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, DbError> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            script: Arc::clone(&self.script),
        })
    }
}

pub struct MockConnection {
    script: Arc<Script>,
}

impl Connection for MockConnection {
    async fn query(&mut self, _sql: &str) -> Result<RowSet, DbError> {
        let started = self.script.queries.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.started.lock().unwrap().push(Instant::now());
        if let Some((limit, token)) = &*self.script.stop_after.lock().unwrap() {
            if started >= *limit {
                token.cancel();
            }
        }
        let slow = self.script.slow_queries.is_none_or(|count| started <= count);
        if slow && !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.script.finished.lock().unwrap().push(Instant::now());
        if self.script.broken_query {
            return Err(DbError::new(DbErrorKind::Query, "syntax error at or near \"FORM\""));
        }
        let remaining = self.script.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.script
                .transient_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(DbError::new(DbErrorKind::ConnectionLost, "connection reset by peer"));
        }
        Ok(RowSet {
            columns: self.script.columns.clone(),
            rows: self.script.rows.clone(),
        })
    }

    fn is_healthy(&self) -> bool {
        true
    }

    async fn close(self) {}
}

/// Destination that records every request it accepts.
#[derive(Default)]
pub struct RecordingDestination {
    pub published: Mutex<Vec<PublishRequest>>,
    pub calls: AtomicUsize,
    /// Reject requests for these tabs with a 400
    pub rejected_tabs: Vec<String>,
    pub delay: Duration,
}

impl RecordingDestination {
    pub fn published(&self) -> Vec<PublishRequest> {
        self.published.lock().unwrap().clone()
    }

    pub fn for_tab(&self, tab: &str) -> Vec<PublishRequest> {
        self.published()
            .into_iter()
            .filter(|r| r.tab == tab)
            .collect()
    }
}

impl Destination for RecordingDestination {
    async fn replace_tab(&self, request: &PublishRequest) -> Result<(), DestinationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected_tabs.contains(&request.tab) {
            return Err(DestinationError::Rejected {
                status: 400,
                message: format!("Unable to parse range: {}", request.tab),
            });
        }
        self.published.lock().unwrap().push(request.clone());
        Ok(())
    }
}

pub fn source(name: &str, tab: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        connection: ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: 5432,
            database: name.to_string(),
            user: "reader".to_string(),
            password: "secret".to_string(),
        },
        query: "SELECT id, username, created_at FROM users ORDER BY id".to_string(),
        tab: tab.to_string(),
        layout: TabLayout {
            start_row: 1,
            column_range: "A:C".parse::<ColumnRange>().unwrap(),
            clear_tail: true,
            status_cell: None,
        },
        pool: PoolOptions {
            min_size: 0,
            max_size: 2,
            acquire_timeout: Duration::from_secs(1),
        },
        cache_capacity: 16,
    }
}

/// Generous quota so tests are not paced by it.
pub fn fast_limiter() -> QuotaLimiter {
    QuotaLimiter::new(QuotaConfig {
        requests: 1000,
        window: Duration::from_secs(1),
    })
    .unwrap()
}

pub fn resilience() -> Resilience {
    Resilience::new(RetryPolicy::immediate(3), None)
}

pub type TestScheduler = Scheduler<MockConnector, RecordingDestination>;
pub type TestPublisher = Publisher<RecordingDestination>;

/// Scheduler over in-memory sources, one script per source.
pub fn scheduler(
    sources: Vec<(SourceConfig, Arc<Script>)>,
    destination: RecordingDestination,
    options: SchedulerOptions,
) -> (TestScheduler, Arc<TestPublisher>) {
    let mut pools = PoolManager::new();
    let mut configs = Vec::new();
    for (config, script) in sources {
        pools.register(&config.name, MockConnector { script }, config.pool);
        configs.push(Arc::new(config));
    }
    let publisher = Arc::new(Publisher::new(destination, fast_limiter(), resilience()));
    let scheduler = Scheduler::new(
        configs,
        Arc::new(pools),
        Arc::clone(&publisher),
        resilience(),
        options,
    );
    (scheduler, publisher)
}
