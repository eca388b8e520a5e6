//! Pipeline sinks: where the final stream of a pipeline goes.
//!
//! A sink takes over the stream's handlers and drives its demand. It holds the stream
//! until it terminates, and resolves with the number of rows it consumed.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use querypipe_core::error::{Error, Result};
use querypipe_core::row::Row;
use querypipe_core::schema::Schema;
use querypipe_io::writers::JsonlWriter;
use querypipe_stream::protocol::{detach, on_data, on_end, on_error};
use querypipe_stream::{capture_by_batch, ReadStream, Ready, TypedStream};

pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Attach to `input` and start pulling. Resolves once the stream ends or fails.
    fn consume(&self, input: TypedStream) -> Ready<u64>;
}

/// Holds the stream handed to it without reading from it.
///
/// Nested pipelines end here: the executor returns the captured stream to the processor
/// that asked for it.
pub struct CaptureSink {
    name: String,
    captured: Mutex<Option<TypedStream>>,
}

impl CaptureSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            captured: Mutex::new(None),
        }
    }

    /// Take the captured stream. Yields `None` before `consume` and after a first take.
    pub fn stream(&self) -> Option<TypedStream> {
        self.captured.lock().take()
    }
}

impl Sink for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&self, input: TypedStream) -> Ready<u64> {
        *self.captured.lock() = Some(input);
        Ready::done(0)
    }
}

/// Collects every row in memory, pulling in fixed-size batches.
pub struct MemorySink {
    batch: u64,
    rows: Arc<Mutex<Vec<Row>>>,
    schema: Mutex<Option<Schema>>,
}

impl MemorySink {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch: batch_size.max(1) as u64,
            rows: Arc::new(Mutex::new(Vec::new())),
            schema: Mutex::new(None),
        }
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }

    /// Schema of the consumed stream, once `consume` has been called.
    pub fn schema(&self) -> Option<Schema> {
        self.schema.lock().clone()
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn consume(&self, input: TypedStream) -> Ready<u64> {
        *self.schema.lock() = Some(input.schema.clone());
        let rows = Arc::clone(&self.rows);
        capture_by_batch(input.stream, self.batch, self.batch).map(move |captured| {
            let n = captured.len() as u64;
            rows.lock().extend(captured);
            n
        })
    }
}

/// Writes rows as newline-delimited JSON, requesting `batch_size` rows at a time.
///
/// A write failure fails the run and cancels the stream.
pub struct JsonlSink<W: Write + Send + 'static> {
    writer: Arc<Mutex<Option<JsonlWriter<W>>>>,
    batch: u64,
}

impl JsonlSink<File> {
    pub fn to_path(path: &str, batch_size: usize) -> Result<Self> {
        let writer = JsonlWriter::to_path(path).map_err(Error::from)?;
        Ok(Self::from_writer(writer, batch_size))
    }
}

impl<W: Write + Send + 'static> JsonlSink<W> {
    pub fn new(writer: W, batch_size: usize) -> Self {
        Self::from_writer(JsonlWriter::to_writer(writer), batch_size)
    }

    fn from_writer(writer: JsonlWriter<W>, batch_size: usize) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
            batch: batch_size.max(1) as u64,
        }
    }

    /// Flush and hand back the underlying writer. The sink writes nothing afterwards.
    pub fn take_writer(&self) -> Result<W> {
        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| Error::Stream("jsonl sink writer already taken".into()))?;
        writer.into_inner().map_err(Error::from)
    }
}

fn flush_jsonl<W: Write>(writer: &Mutex<Option<JsonlWriter<W>>>) -> Result<u64> {
    match writer.lock().as_mut() {
        Some(w) => {
            w.flush()?;
            Ok(w.rows_written())
        }
        None => Err(Error::Stream("jsonl sink writer already taken".into())),
    }
}

impl<W: Write + Send + 'static> Sink for JsonlSink<W> {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn consume(&self, input: TypedStream) -> Ready<u64> {
        let ready = Ready::new();
        let batch = self.batch;
        let stream = input.stream;
        let keep: Arc<Mutex<Option<Arc<dyn ReadStream<Row>>>>> =
            Arc::new(Mutex::new(Some(Arc::clone(&stream))));
        let outstanding = Arc::new(Mutex::new(batch));

        let writer = Arc::clone(&self.writer);
        let weak = Arc::downgrade(&stream);
        let r = ready.clone();
        let held = Arc::clone(&keep);
        stream.set_data_handler(on_data(move |row: Row| {
            let written = match writer.lock().as_mut() {
                Some(w) => w.write_row(&row).map_err(Error::from),
                None => Err(Error::Stream("jsonl sink writer already taken".into())),
            };
            if let Err(e) = written {
                tracing::error!(error = %e, "jsonl sink write failed");
                r.fail(e);
                if let Some(s) = weak.upgrade() {
                    detach(s.as_ref());
                }
                held.lock().take();
                return;
            }
            let refill = {
                let mut left = outstanding.lock();
                *left = left.saturating_sub(1);
                if *left == 0 {
                    *left = batch;
                    true
                } else {
                    false
                }
            };
            if refill {
                tracing::trace!(batch, "jsonl sink requesting next batch");
                if let Some(s) = weak.upgrade() {
                    s.fetch(batch);
                }
            }
        }));

        let writer = Arc::clone(&self.writer);
        let r = ready.clone();
        let held = Arc::clone(&keep);
        stream.set_end_handler(on_end(move || {
            r.settle(flush_jsonl(&writer));
            held.lock().take();
        }));

        let writer = Arc::clone(&self.writer);
        let r = ready.clone();
        stream.set_error_handler(on_error(move |err| {
            if let Err(e) = flush_jsonl(&writer) {
                tracing::warn!(error = %e, "jsonl sink flush after failure failed");
            }
            r.fail(err);
            keep.lock().take();
        }));

        stream.fetch(batch);
        ready
    }
}
