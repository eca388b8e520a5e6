//! Validated description of a join: which keys line up and what the join writes.

use serde::{Deserialize, Serialize};

use querypipe_core::defn::{DynamicFieldDefn, GroupConcatDefn, MergeDefn};
use querypipe_core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotSpec {
    pub field_id_column: String,
    pub field_name_column: String,
    pub field_type_column: String,
    pub field_column_column: String,
    /// Column of a value row naming the field it belongs to.
    pub values_field_id_column: String,
    /// Value columns tried in order when a field does not name its own column.
    pub value_columns: Vec<String>,
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinVariant {
    /// Copy the first matching secondary row's columns.
    MergeAll {
        include: Vec<String>,
        exclude: Vec<String>,
    },
    /// Concatenate values of all matching secondary rows.
    Concatenate {
        delimiter: String,
        child_value_column: Option<String>,
        parent_value_column: Option<String>,
    },
    /// Turn matching secondary rows into typed columns named by field definitions.
    Pivot(PivotSpec),
}

impl JoinVariant {
    pub fn name(&self) -> &'static str {
        match self {
            JoinVariant::MergeAll { .. } => "merge",
            JoinVariant::Concatenate { .. } => "group_concat",
            JoinVariant::Pivot(_) => "dynamic_field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDescriptor {
    pub primary_keys: Vec<String>,
    pub secondary_keys: Vec<String>,
    pub inner_join: bool,
    pub variant: JoinVariant,
}

impl JoinDescriptor {
    pub fn new(
        primary_keys: Vec<String>,
        secondary_keys: Vec<String>,
        inner_join: bool,
        variant: JoinVariant,
    ) -> Result<Self> {
        if primary_keys.is_empty() {
            return Err(Error::Config("join requires at least one parent key column".into()));
        }
        if primary_keys.len() != secondary_keys.len() {
            return Err(Error::Config(format!(
                "join key count mismatch: {} parent columns, {} child columns",
                primary_keys.len(),
                secondary_keys.len()
            )));
        }
        for name in primary_keys.iter().chain(&secondary_keys) {
            non_blank("join key column", name)?;
        }
        match &variant {
            JoinVariant::MergeAll { include, exclude } => {
                for name in include.iter().chain(exclude) {
                    non_blank("merge column", name)?;
                }
            }
            JoinVariant::Concatenate {
                child_value_column,
                parent_value_column,
                ..
            } => {
                if let Some(c) = child_value_column {
                    non_blank("child_value_column", c)?;
                }
                match (child_value_column, parent_value_column) {
                    (None, Some(_)) => {
                        return Err(Error::Config(
                            "parent_value_column requires child_value_column".into(),
                        ))
                    }
                    (_, Some(p)) => non_blank("parent_value_column", p)?,
                    _ => {}
                }
            }
            JoinVariant::Pivot(spec) => {
                non_blank("field_id_column", &spec.field_id_column)?;
                non_blank("field_name_column", &spec.field_name_column)?;
                non_blank("field_type_column", &spec.field_type_column)?;
                non_blank("field_column_column", &spec.field_column_column)?;
                non_blank("values_field_id_column", &spec.values_field_id_column)?;
                for name in &spec.value_columns {
                    non_blank("field_value_column_name entry", name)?;
                }
            }
        }
        Ok(Self {
            primary_keys,
            secondary_keys,
            inner_join,
            variant,
        })
    }

    pub fn for_merge(defn: &MergeDefn) -> Result<Self> {
        Self::new(
            defn.keys.parent_id_columns.clone(),
            defn.keys.child_id_columns.clone(),
            defn.keys.inner_join,
            JoinVariant::MergeAll {
                include: defn.include_columns.clone(),
                exclude: defn.exclude_columns.clone(),
            },
        )
    }

    pub fn for_group_concat(defn: &GroupConcatDefn) -> Result<Self> {
        Self::new(
            defn.keys.parent_id_columns.clone(),
            defn.keys.child_id_columns.clone(),
            defn.keys.inner_join,
            JoinVariant::Concatenate {
                delimiter: defn.delimiter.clone(),
                child_value_column: defn.child_value_column.clone(),
                parent_value_column: defn.parent_value_column.clone(),
            },
        )
    }

    pub fn for_dynamic_field(defn: &DynamicFieldDefn) -> Result<Self> {
        let value_columns = defn
            .field_value_column_name
            .as_deref()
            .map(|names| {
                names
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self::new(
            defn.parent_id_columns.clone(),
            defn.values_parent_id_columns.clone(),
            defn.inner_join,
            JoinVariant::Pivot(PivotSpec {
                field_id_column: defn.field_id_column.clone(),
                field_name_column: defn.field_name_column.clone(),
                field_type_column: defn.field_type_column.clone(),
                field_column_column: defn.field_column_column.clone(),
                values_field_id_column: defn.values_field_id_column.clone(),
                value_columns,
                case_insensitive: defn.use_case_insensitive_field_names,
            }),
        )
    }

    pub fn is_secondary_key(&self, column: &str) -> bool {
        self.secondary_keys.iter().any(|k| k == column)
    }
}

fn non_blank(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Config(format!("{} must not be blank", what)));
    }
    Ok(())
}
