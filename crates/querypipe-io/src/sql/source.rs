//! SQL source: connection, statement and transaction wired into a `MetadataRowStream`.

use std::sync::Arc;

use parking_lot::Mutex;

use querypipe_core::defn::SqlSourceDefn;
use querypipe_core::row::Row;
use querypipe_core::types::Value;
use querypipe_stream::{ExecContext, ReadStream, Ready, TypedStream};

use super::driver::{ConnectionPool, SqlConnection};
use super::stream::{MetadataRowStream, SqlResources, StreamOptions};
use crate::source::Source;

pub struct SqlSource {
    name: String,
    defn: SqlSourceDefn,
    pool: Arc<dyn ConnectionPool>,
    fetch_size: usize,
}

impl SqlSource {
    /// `fetch_size` is the engine default; the definition may override it.
    pub fn new(
        name: impl Into<String>,
        defn: SqlSourceDefn,
        pool: Arc<dyn ConnectionPool>,
        fetch_size: usize,
    ) -> Self {
        let fetch_size = defn.fetch_size.unwrap_or(fetch_size).max(1);
        Self {
            name: name.into(),
            defn,
            pool,
            fetch_size,
        }
    }
}

impl Source for SqlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(self: Box<Self>, ctx: &ExecContext) -> Ready<TypedStream> {
        let SqlSource {
            name,
            defn,
            pool,
            fetch_size,
        } = *self;
        tracing::debug!(source = %name, endpoint = %defn.endpoint, "initializing sql source");

        // Held until the stream takes ownership, so a failure before then can close it.
        let pending: Arc<Mutex<Option<Arc<dyn SqlConnection>>>> = Arc::new(Mutex::new(None));

        let opts = StreamOptions {
            name: name.clone(),
            fetch_size,
            params: defn.params.iter().map(Value::from_json).collect(),
            column_types: defn.column_types.clone(),
        };
        let query = defn.query.clone();
        let stream_ctx = ctx.clone();
        let held = Arc::clone(&pending);
        let cleanup = Arc::clone(&pending);

        pool.connection()
            .and_then(move |conn| {
                *held.lock() = Some(Arc::clone(&conn));
                let for_tx = Arc::clone(&conn);
                conn.prepare(&query).and_then(move |statement| {
                    for_tx
                        .begin()
                        .map(move |transaction| (held, for_tx, statement, transaction))
                })
            })
            .and_then(move |(held, connection, statement, transaction)| {
                held.lock().take();
                let stream = Arc::new(MetadataRowStream::new(
                    &stream_ctx,
                    SqlResources {
                        connection,
                        transaction,
                        statement,
                    },
                    opts,
                ));
                let ready = stream.ready();
                ready.map(move |schema| {
                    let stream: Arc<dyn ReadStream<Row>> = stream;
                    TypedStream::new(stream, schema)
                })
            })
            .on_failure(move |e| {
                tracing::warn!(source = %name, error = %e, "sql source failed to initialize");
                if let Some(conn) = cleanup.lock().take() {
                    conn.close();
                }
            })
            .on_context(ctx)
    }
}
