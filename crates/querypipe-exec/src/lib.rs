#![forbid(unsafe_code)]
//! querypipe-exec: wires sources, processors and sinks into running pipelines.
//!
//! The executor builds every stage synchronously (so bad definitions fail before any
//! stream opens), initializes them in order on one `ExecContext`, and hands the final
//! stream to a sink. Nested pipelines requested by processors are built the same way
//! and captured instead of sunk.

pub mod endpoints;
pub mod metrics;
pub mod runtime;
pub mod sink;

pub use endpoints::memory_endpoints;
pub use metrics::RunSummary;
pub use runtime::{resolve_config, ExecError, PipelineExecutor};
pub use sink::{CaptureSink, JsonlSink, MemorySink, Sink};
