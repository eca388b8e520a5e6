//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::defn::{Pipeline, ProcessorDefn, SourceDefn, SourcePipeline};
pub use crate::error::{Error, Result};
pub use crate::id::PipelineId;
pub use crate::row::Row;
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::Value;
