#![forbid(unsafe_code)]
//! querypipe-io: sources and writers.
//!
//! - `sql`: driver interfaces, the cursor-backed `MetadataRowStream`, the `SqlSource`
//!   that wires connection, statement and transaction together, and an in-memory driver.
//! - `static_source`: rows declared inline in a pipeline definition.
//! - `writers`: newline-delimited JSON output for rows.

pub mod error;
pub mod source;
pub mod sql;
pub mod static_source;
pub mod writers;

pub use source::Source;
