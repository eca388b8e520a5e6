//! In-memory SQL driver for testing.
//!
//! Queries are registered by their SQL text together with column descriptors and rows.
//! Every lifecycle call is counted so tests can check that resources are released once.
//! Statement parameters are recorded but not bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use querypipe_core::error::{Error, Result};
use querypipe_core::types::Value;
use querypipe_stream::{ExecContext, Ready};

use super::driver::{
    ColumnDescriptor, ConnectionPool, Cursor, PreparedStatement, RowSet, SqlConnection,
    Transaction,
};

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }
}

/// Where driver results are delivered from.
#[derive(Clone, Default)]
pub enum Delivery {
    /// Settled before the call returns.
    #[default]
    Inline,
    /// Settled by a task on the given context.
    Context(ExecContext),
    /// Settled from a freshly spawned thread, like a network driver would.
    Thread,
}

#[derive(Debug, Default)]
pub struct LifecycleCounters {
    pub connections_opened: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub cursors_opened: AtomicUsize,
    pub cursors_closed: AtomicUsize,
    pub reads: AtomicUsize,
    pub commits: AtomicUsize,
}

impl LifecycleCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            connections_opened: self.connections_opened.load(Ordering::SeqCst),
            connections_closed: self.connections_closed.load(Ordering::SeqCst),
            cursors_opened: self.cursors_opened.load(Ordering::SeqCst),
            cursors_closed: self.cursors_closed.load(Ordering::SeqCst),
            reads: self.reads.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
        }
    }
}

/// Plain copy of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub cursors_opened: usize,
    pub cursors_closed: usize,
    pub reads: usize,
    pub commits: usize,
}

#[derive(Default)]
struct DbInner {
    queries: Mutex<HashMap<String, QueryResult>>,
    read_failures: Mutex<HashMap<String, usize>>,
    refuse_connections: AtomicBool,
    last_params: Mutex<Vec<Value>>,
    counters: LifecycleCounters,
    delivery: Delivery,
}

impl DbInner {
    fn deliver<T: Clone + Send + 'static>(&self, result: Result<T>) -> Ready<T> {
        match &self.delivery {
            Delivery::Inline => Ready::from_result(result),
            Delivery::Context(ctx) => {
                let out = Ready::new();
                let o = out.clone();
                ctx.run_on_context(move || {
                    o.settle(result);
                });
                out
            }
            Delivery::Thread => {
                let out = Ready::new();
                let o = out.clone();
                std::thread::spawn(move || {
                    o.settle(result);
                });
                out
            }
        }
    }
}

/// Thread-safe in-memory database that doubles as its own connection pool.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<DbInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delivery(delivery: Delivery) -> Self {
        Self {
            inner: Arc::new(DbInner {
                delivery,
                ..DbInner::default()
            }),
        }
    }

    /// Register the result for a query text (surrounding whitespace ignored).
    pub fn register(&self, sql: &str, result: QueryResult) {
        self.inner
            .queries
            .lock()
            .insert(sql.trim().to_string(), result);
    }

    /// Make the `n`th read (0-based) of cursors over `sql` fail.
    pub fn fail_read(&self, sql: &str, n: usize) {
        self.inner
            .read_failures
            .lock()
            .insert(sql.trim().to_string(), n);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn counters(&self) -> &LifecycleCounters {
        &self.inner.counters
    }

    pub fn last_params(&self) -> Vec<Value> {
        self.inner.last_params.lock().clone()
    }
}

impl ConnectionPool for MemoryDatabase {
    fn connection(&self) -> Ready<Arc<dyn SqlConnection>> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return self
                .inner
                .deliver(Err(Error::Source("connection refused".into())));
        }
        self.inner
            .counters
            .connections_opened
            .fetch_add(1, Ordering::SeqCst);
        let conn: Arc<dyn SqlConnection> = Arc::new(MemoryConnection {
            db: Arc::clone(&self.inner),
        });
        self.inner.deliver(Ok(conn))
    }
}

struct MemoryConnection {
    db: Arc<DbInner>,
}

impl SqlConnection for MemoryConnection {
    fn prepare(&self, sql: &str) -> Ready<Arc<dyn PreparedStatement>> {
        let key = sql.trim().to_string();
        let result = self.db.queries.lock().get(&key).cloned();
        match result {
            Some(result) => {
                let fail_at = self.db.read_failures.lock().get(&key).copied();
                let stmt: Arc<dyn PreparedStatement> = Arc::new(MemoryStatement {
                    db: Arc::clone(&self.db),
                    result: Arc::new(result),
                    fail_at,
                });
                self.db.deliver(Ok(stmt))
            }
            None => self
                .db
                .deliver(Err(Error::Source(format!("unknown query: {}", key)))),
        }
    }

    fn begin(&self) -> Ready<Arc<dyn Transaction>> {
        let tx: Arc<dyn Transaction> = Arc::new(MemoryTransaction {
            db: Arc::clone(&self.db),
        });
        self.db.deliver(Ok(tx))
    }

    fn close(&self) -> Ready<()> {
        self.db
            .counters
            .connections_closed
            .fetch_add(1, Ordering::SeqCst);
        self.db.deliver(Ok(()))
    }
}

struct MemoryStatement {
    db: Arc<DbInner>,
    result: Arc<QueryResult>,
    fail_at: Option<usize>,
}

impl PreparedStatement for MemoryStatement {
    fn cursor(&self, params: &[Value]) -> Arc<dyn Cursor> {
        *self.db.last_params.lock() = params.to_vec();
        self.db
            .counters
            .cursors_opened
            .fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryCursor {
            db: Arc::clone(&self.db),
            result: Arc::clone(&self.result),
            fail_at: self.fail_at,
            pos: Mutex::new(0),
            reads: AtomicUsize::new(0),
        })
    }
}

struct MemoryCursor {
    db: Arc<DbInner>,
    result: Arc<QueryResult>,
    fail_at: Option<usize>,
    pos: Mutex<usize>,
    reads: AtomicUsize,
}

impl Cursor for MemoryCursor {
    fn read(&self, count: usize) -> Ready<RowSet> {
        self.db.counters.reads.fetch_add(1, Ordering::SeqCst);
        let nth = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(nth) {
            return self
                .db
                .deliver(Err(Error::Source(format!("read {} failed", nth))));
        }
        let rows = {
            let mut pos = self.pos.lock();
            let start = (*pos).min(self.result.rows.len());
            let end = start.saturating_add(count).min(self.result.rows.len());
            *pos = end;
            self.result.rows[start..end].to_vec()
        };
        self.db.deliver(Ok(RowSet {
            columns: self.result.columns.clone(),
            rows,
        }))
    }

    fn has_more(&self) -> bool {
        *self.pos.lock() < self.result.rows.len()
    }

    fn close(&self) -> Ready<()> {
        self.db
            .counters
            .cursors_closed
            .fetch_add(1, Ordering::SeqCst);
        self.db.deliver(Ok(()))
    }
}

struct MemoryTransaction {
    db: Arc<DbInner>,
}

impl Transaction for MemoryTransaction {
    fn commit(&self) -> Ready<()> {
        self.db.counters.commits.fetch_add(1, Ordering::SeqCst);
        self.db.deliver(Ok(()))
    }
}
