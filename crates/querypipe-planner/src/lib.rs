#![forbid(unsafe_code)]
//! querypipe-planner: from a YAML document to a validated pipeline definition.
//!
//! Design:
//! - The DSL deserializes straight into `querypipe-core::defn` types; this crate adds
//!   the document wrapper (engine overrides, in-memory endpoints) and its errors.
//! - `validate` builds every join descriptor so configuration mistakes surface before
//!   any connection is opened.
//! - `explain` renders the pipeline tree for humans.
//!
//! NOTE: No I/O or stream types here; executing a plan is the exec crate's job.

pub mod dsl;
pub mod explain;
pub mod validate;

pub use dsl::yaml::{
    parse_yaml_pipeline, ColumnDefn, EndpointDefn, ParsedPipeline, PlanError, QueryDefn,
};
pub use explain::explain;
pub use validate::{validate_parsed, validate_pipeline, visit_sources};
