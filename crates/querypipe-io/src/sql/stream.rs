//! Cursor-backed row stream.
//!
//! `MetadataRowStream` adapts a driver cursor to the stream protocol. The cursor is
//! opened lazily, read in pages of `fetch_size`, and every page is drained under demand
//! before the next physical read. Column descriptors from the first page define the
//! schema and resolve `ready()`, even when the page holds no rows.
//!
//! Resources are released in order (cursor close, transaction commit, connection
//! close) exactly once, on whichever of end, error or cancellation comes first.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use querypipe_core::error::{Error, Result};
use querypipe_core::row::Row;
use querypipe_core::schema::{DataType, Schema};
use querypipe_core::types::Value;
use querypipe_stream::protocol::{signal_end, signal_error};
use querypipe_stream::{
    DataHandler, Demand, EndHandler, ErrorHandler, ExecContext, Handlers, ReadStream, Ready,
};

use super::driver::{ColumnDescriptor, Cursor, PreparedStatement, RowSet, SqlConnection, Transaction};

/// Everything the stream owns and must give back.
pub struct SqlResources {
    pub connection: Arc<dyn SqlConnection>,
    pub transaction: Arc<dyn Transaction>,
    pub statement: Arc<dyn PreparedStatement>,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub name: String,
    pub fetch_size: usize,
    pub params: Vec<Value>,
    pub column_types: BTreeMap<String, DataType>,
}

struct StreamState {
    opened: bool,
    cursor: Option<Arc<dyn Cursor>>,
    read_in_progress: bool,
    exhausted: bool,
    buffer: VecDeque<Vec<Value>>,
    columns: Option<Arc<Vec<(String, DataType)>>>,
    demand: Demand,
    handlers: Handlers<Row>,
    scheduled: bool,
    delivered: u64,
}

struct Inner {
    ctx: ExecContext,
    opts: StreamOptions,
    schema: Schema,
    ready: Ready<Schema>,
    resources: SqlResources,
    release_started: AtomicBool,
    released: Ready<()>,
    state: Mutex<StreamState>,
}

pub struct MetadataRowStream {
    inner: Arc<Inner>,
}

impl MetadataRowStream {
    pub fn new(ctx: &ExecContext, resources: SqlResources, opts: StreamOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx: ctx.clone(),
                opts,
                schema: Schema::new(),
                ready: Ready::new(),
                resources,
                release_started: AtomicBool::new(false),
                released: Ready::new(),
                state: Mutex::new(StreamState {
                    opened: false,
                    cursor: None,
                    read_in_progress: false,
                    exhausted: false,
                    buffer: VecDeque::new(),
                    columns: None,
                    demand: Demand::new(),
                    handlers: Handlers::default(),
                    scheduled: false,
                    delivered: 0,
                }),
            }),
        }
    }

    /// Resolves with the schema once the first page (and its column descriptors) has
    /// arrived. Requesting it opens the cursor.
    pub fn ready(&self) -> Ready<Schema> {
        Inner::open(&self.inner);
        self.inner.ready.clone()
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Cancel the stream and release its resources. Completes once released.
    pub fn close(&self) -> Ready<()> {
        Inner::cancel(&self.inner);
        self.inner.released.clone()
    }
}

impl Inner {
    fn open(this: &Arc<Self>) {
        let cursor = {
            let mut st = this.state.lock();
            if st.opened || st.handlers.is_terminated() {
                return;
            }
            st.opened = true;
            st.read_in_progress = true;
            let cursor = this.resources.statement.cursor(&this.opts.params);
            st.cursor = Some(Arc::clone(&cursor));
            cursor
        };
        tracing::info!(source = %this.opts.name, fetch_size = this.opts.fetch_size, "cursor opened");
        Inner::read(this, cursor);
    }

    fn read(this: &Arc<Self>, cursor: Arc<dyn Cursor>) {
        tracing::trace!(source = %this.opts.name, "reading page");
        let inner = Arc::clone(this);
        cursor.read(this.opts.fetch_size).on_complete(move |r| {
            let ctx = inner.ctx.clone();
            ctx.run_on_context(move || Inner::on_page(&inner, r));
        });
    }

    fn on_page(this: &Arc<Self>, page: Result<RowSet>) {
        let page = match page {
            Ok(p) => p,
            Err(e) => return Inner::fail(this, e),
        };
        let first = {
            let mut st = this.state.lock();
            st.read_in_progress = false;
            if st.handlers.is_terminated() {
                return;
            }
            let first = st.columns.is_none();
            if first {
                match this.declare_columns(&page.columns) {
                    Ok(cols) => st.columns = Some(Arc::new(cols)),
                    Err(e) => {
                        drop(st);
                        return Inner::fail(this, e);
                    }
                }
            }
            st.exhausted = !st.cursor.as_ref().map(|c| c.has_more()).unwrap_or(false);
            tracing::debug!(
                source = %this.opts.name,
                rows = page.rows.len(),
                exhausted = st.exhausted,
                "page received"
            );
            st.buffer.extend(page.rows);
            first
        };
        if first {
            this.ready.complete(this.schema.clone());
        }
        Inner::schedule(this);
    }

    fn declare_columns(&self, columns: &[ColumnDescriptor]) -> Result<Vec<(String, DataType)>> {
        columns
            .iter()
            .map(|cd| {
                let dt = cd.data_type(&self.opts.column_types)?;
                tracing::info!(
                    source = %self.opts.name,
                    column = %cd.name,
                    sql_type = ?cd.sql_type,
                    data_type = %dt,
                    "column declared"
                );
                self.schema.declare(&cd.name, dt)?;
                Ok((cd.name.clone(), dt))
            })
            .collect()
    }

    fn schedule(this: &Arc<Self>) {
        {
            let mut st = this.state.lock();
            if st.scheduled || st.handlers.is_terminated() {
                return;
            }
            st.scheduled = true;
        }
        let inner = Arc::clone(this);
        this.ctx.run_on_context(move || Inner::emit(&inner));
    }

    fn emit(this: &Arc<Self>) {
        loop {
            let mut st = this.state.lock();
            if st.handlers.is_terminated() || st.handlers.data.is_none() {
                st.scheduled = false;
                return;
            }
            if !st.buffer.is_empty() {
                if !st.demand.take_one() {
                    st.scheduled = false;
                    return;
                }
                let (Some(values), Some(handler), Some(columns)) = (
                    st.buffer.pop_front(),
                    st.handlers.data.clone(),
                    st.columns.clone(),
                ) else {
                    st.scheduled = false;
                    return;
                };
                st.delivered += 1;
                drop(st);
                let row = this.to_row(&columns, values);
                handler(row);
                continue;
            }
            if st.read_in_progress {
                st.scheduled = false;
                return;
            }
            if !st.exhausted {
                st.scheduled = false;
                if !st.demand.has() {
                    return;
                }
                let Some(cursor) = st.cursor.clone() else {
                    return;
                };
                st.read_in_progress = true;
                drop(st);
                Inner::read(this, cursor);
                return;
            }
            st.scheduled = false;
            let delivered = st.delivered;
            let end = st.handlers.terminate_end();
            drop(st);
            if let Some(end) = end {
                if delivered > 0 {
                    tracing::info!(source = %this.opts.name, rows = delivered, "finished row stream after handling some rows");
                } else {
                    tracing::info!(source = %this.opts.name, "finished row stream without handling any rows");
                }
                let ctx = this.ctx.clone();
                Inner::release(this).on_complete(move |_| {
                    ctx.run_on_context(move || signal_end(end));
                });
            }
            return;
        }
    }

    fn to_row(&self, columns: &[(String, DataType)], values: Vec<Value>) -> Row {
        let mut row = Row::new(&self.schema);
        for ((name, dt), value) in columns.iter().zip(values) {
            let value = if value.is_null() || value.data_type() == *dt {
                value
            } else {
                match dt.cast(&value) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(source = %self.opts.name, column = %name, error = %e, "value coercion failed, using null");
                        Value::Null
                    }
                }
            };
            row.put(name, value);
        }
        row
    }

    fn fail(this: &Arc<Self>, err: Error) {
        let handler = {
            let mut st = this.state.lock();
            st.buffer.clear();
            st.handlers.terminate_error()
        };
        this.ready.fail(err.clone());
        let Some(handler) = handler else {
            tracing::debug!(source = %this.opts.name, error = %err, "error after termination ignored");
            return;
        };
        tracing::warn!(source = %this.opts.name, error = %err, "row stream failed");
        let ctx = this.ctx.clone();
        let name = this.opts.name.clone();
        Inner::release(this).on_complete(move |_| {
            ctx.run_on_context(move || signal_error(handler, err, &name));
        });
    }

    fn cancel(this: &Arc<Self>) {
        {
            let mut st = this.state.lock();
            if st.handlers.is_terminated() {
                return;
            }
            st.handlers.cancel();
            st.buffer.clear();
        }
        tracing::debug!(source = %this.opts.name, "row stream cancelled");
        this.ready
            .fail(Error::Stream(format!("{} closed before it was ready", this.opts.name)));
        Inner::release(this);
    }

    /// Cursor close, then commit, then connection close. Runs once; later callers get
    /// the same completion.
    fn release(this: &Arc<Self>) -> Ready<()> {
        if this.release_started.swap(true, Ordering::AcqRel) {
            return this.released.clone();
        }
        let cursor = this.state.lock().cursor.take();
        let closed = match cursor {
            Some(c) => c.close(),
            None => Ready::done(()),
        };
        let inner = Arc::clone(this);
        closed.on_complete(move |r| {
            if let Err(e) = r {
                tracing::warn!(source = %inner.opts.name, error = %e, "cursor close failed");
            }
            let tx = Arc::clone(&inner.resources.transaction);
            tx.commit().on_complete(move |r| {
                if let Err(e) = r {
                    tracing::warn!(source = %inner.opts.name, error = %e, "transaction commit failed");
                }
                tracing::info!(source = %inner.opts.name, "closing connection");
                let conn = Arc::clone(&inner.resources.connection);
                conn.close().on_complete(move |r| {
                    if let Err(e) = r {
                        tracing::warn!(source = %inner.opts.name, error = %e, "connection close failed");
                    }
                    tracing::info!(source = %inner.opts.name, "closed connection");
                    inner.released.complete(());
                });
            });
        });
        this.released.clone()
    }
}

impl Drop for MetadataRowStream {
    fn drop(&mut self) {
        Inner::cancel(&self.inner);
    }
}

impl ReadStream<Row> for MetadataRowStream {
    fn set_data_handler(&self, handler: Option<DataHandler<Row>>) {
        match handler {
            Some(h) => {
                {
                    let mut st = self.inner.state.lock();
                    if st.handlers.is_terminated() {
                        return;
                    }
                    st.handlers.data = Some(h);
                }
                Inner::open(&self.inner);
                Inner::schedule(&self.inner);
            }
            None => Inner::cancel(&self.inner),
        }
    }

    fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.inner.state.lock().handlers.error = handler;
    }

    fn set_end_handler(&self, handler: Option<EndHandler>) {
        self.inner.state.lock().handlers.end = handler;
    }

    fn pause(&self) {
        tracing::trace!(source = %self.inner.opts.name, "paused");
        self.inner.state.lock().demand.clear();
    }

    fn resume(&self) {
        tracing::trace!(source = %self.inner.opts.name, "resumed");
        self.inner.state.lock().demand.set_unbounded();
        Inner::schedule(&self.inner);
    }

    fn fetch(&self, n: u64) {
        self.inner.state.lock().demand.add(n);
        Inner::schedule(&self.inner);
    }
}
