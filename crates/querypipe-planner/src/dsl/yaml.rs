//! YAML → pipeline definition.
//!
//! Example:
//! ```yaml
//! config:
//!   fetch_size: 500
//! endpoints:
//!   main:
//!     queries:
//!       - sql: "select id, name from parent order by id"
//!         columns: [ { name: id, type: BIGINT }, { name: name, type: VARCHAR } ]
//!         rows: [ [1, "a"], [2, "b"] ]
//! source: { type: sql, endpoint: main, query: "select id, name from parent order by id" }
//! processors:
//!   - type: group_concat
//!     parent_id_columns: [id]
//!     child_id_columns: [parent_id]
//!     child_value_column: tag
//!     input:
//!       source: { type: sql, endpoint: main, query: "select parent_id, tag from tags order by parent_id" }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use querypipe_core::defn::Pipeline;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid pipeline: {0}")]
    Invalid(#[from] querypipe_core::Error),
}

/// A column of an in-memory query result, typed by SQL type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefn {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefn {
    pub sql: String,
    pub columns: Vec<ColumnDefn>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// An in-memory database declared inline, addressable by SQL sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointDefn {
    #[serde(default)]
    pub queries: Vec<QueryDefn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    endpoints: BTreeMap<String, EndpointDefn>,
    #[serde(flatten)]
    pipeline: Pipeline,
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub pipeline: Pipeline,
    pub endpoints: BTreeMap<String, EndpointDefn>,
}

pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<ParsedPipeline, PlanError> {
    let doc: Document = serde_yaml::from_str(yaml_src)?;
    Ok(ParsedPipeline {
        pipeline: doc.pipeline,
        endpoints: doc.endpoints,
    })
}
