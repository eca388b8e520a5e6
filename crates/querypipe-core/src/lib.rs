#![forbid(unsafe_code)]
//! querypipe-core: values, the type lattice, shared schemas, rows, engine config and
//! pipeline definitions.
//!
//! Everything here is pure data plus the small amount of logic that has to agree across
//! crates (common-type widening, casting, value ordering). No streams, no I/O.

pub mod config;
pub mod defn;
pub mod error;
pub mod id;
pub mod prelude;
pub mod row;
pub mod schema;
pub mod types;

pub use error::{Error, Result};
