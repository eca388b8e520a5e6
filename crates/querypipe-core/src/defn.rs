//! Pipeline definitions: the serializable description of sources and processors.
//!
//! These are pure data. Build-time validation lives in the planner and the operator
//! constructors; nothing here opens a stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::schema::{DataType, Field};

/// A top-level pipeline: one source pipeline plus optional engine overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub config: Option<EngineConfig>,
    #[serde(flatten)]
    pub body: SourcePipeline,
}

/// A source followed by an ordered chain of processors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePipeline {
    pub source: SourceDefn,
    #[serde(default)]
    pub processors: Vec<ProcessorDefn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDefn {
    Sql(SqlSourceDefn),
    Static(StaticSourceDefn),
}

impl SourceDefn {
    pub fn name(&self) -> Option<&str> {
        match self {
            SourceDefn::Sql(s) => s.name.as_deref(),
            SourceDefn::Static(s) => s.name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlSourceDefn {
    #[serde(default)]
    pub name: Option<String>,
    /// Name of a registered connection pool.
    pub endpoint: String,
    pub query: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    /// Overrides the engine-wide fetch size for this source.
    #[serde(default)]
    pub fetch_size: Option<usize>,
    /// Column types that replace the driver-reported types.
    #[serde(default)]
    pub column_types: BTreeMap<String, DataType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSourceDefn {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<Field>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorDefn {
    Merge(MergeDefn),
    GroupConcat(GroupConcatDefn),
    DynamicField(DynamicFieldDefn),
    Lookup(LookupDefn),
    Limit { limit: u64 },
    Offset { offset: u64 },
}

impl ProcessorDefn {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorDefn::Merge(_) => "merge",
            ProcessorDefn::GroupConcat(_) => "group_concat",
            ProcessorDefn::DynamicField(_) => "dynamic_field",
            ProcessorDefn::Lookup(_) => "lookup",
            ProcessorDefn::Limit { .. } => "limit",
            ProcessorDefn::Offset { .. } => "offset",
        }
    }
}

/// Key columns shared by every joining processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinKeys {
    pub parent_id_columns: Vec<String>,
    pub child_id_columns: Vec<String>,
    #[serde(default)]
    pub inner_join: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDefn {
    pub input: SourcePipeline,
    #[serde(flatten)]
    pub keys: JoinKeys,
    #[serde(default)]
    pub include_columns: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConcatDefn {
    pub input: SourcePipeline,
    #[serde(flatten)]
    pub keys: JoinKeys,
    #[serde(default)]
    pub child_value_column: Option<String>,
    #[serde(default)]
    pub parent_value_column: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    ", ".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicFieldDefn {
    /// Pipeline yielding one row per field definition.
    pub field_defns: SourcePipeline,
    /// Pipeline yielding field values, sorted by `values_parent_id_columns`.
    pub field_values: SourcePipeline,
    pub parent_id_columns: Vec<String>,
    pub values_parent_id_columns: Vec<String>,
    pub values_field_id_column: String,
    #[serde(default = "default_field_id_column")]
    pub field_id_column: String,
    #[serde(default = "default_field_name_column")]
    pub field_name_column: String,
    #[serde(default = "default_field_type_column")]
    pub field_type_column: String,
    #[serde(default = "default_field_column_column")]
    pub field_column_column: String,
    /// Comma-separated value columns tried in order when a field names no column.
    #[serde(default)]
    pub field_value_column_name: Option<String>,
    #[serde(default)]
    pub use_case_insensitive_field_names: bool,
    #[serde(default)]
    pub inner_join: bool,
}

/// Key/value map loaded from a pipeline, applied to fields of every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupDefn {
    /// Pipeline yielding the key/value pairs. Further columns are ignored.
    pub map: SourcePipeline,
    pub lookup_key_field: String,
    pub lookup_value_field: String,
    pub lookup_fields: Vec<LookupField>,
}

/// One looked-up field: the row column holding the key, and the column receiving the
/// mapped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupField {
    pub key_field: String,
    pub value_field: String,
}

fn default_field_id_column() -> String {
    "id".to_string()
}

fn default_field_name_column() -> String {
    "name".to_string()
}

fn default_field_type_column() -> String {
    "type".to_string()
}

fn default_field_column_column() -> String {
    "column".to_string()
}
