//! Pivot field-value rows into typed columns on the primary row.
//!
//! A field-definition stream names each dynamic column (id, name, type, optional value
//! column). For every primary row, each field takes its value from the first matching
//! secondary row whose field id equals the field's id.

use std::cmp::Ordering;

use querypipe_core::error::Result;
use querypipe_core::row::Row;
use querypipe_core::schema::{DataType, Schema};
use querypipe_core::types::Value;

use super::compare::compare_as_common;
use super::descriptor::PivotSpec;
use super::RowCombiner;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefn {
    pub id: Value,
    /// Column name written on the primary row (lower-cased when case-insensitive).
    pub key: String,
    pub data_type: DataType,
    /// Secondary column holding this field's value, if the field names one.
    pub column: Option<String>,
}

impl FieldDefn {
    /// Read one field definition row. Rows without an id, with a blank name or with an
    /// unknown type are skipped.
    pub fn from_row(row: &Row, spec: &PivotSpec) -> Option<FieldDefn> {
        if row.is_empty() {
            return None;
        }
        let id = match row.get(&spec.field_id_column) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                tracing::debug!(row = ?row, "skipping field defn row with no id");
                return None;
            }
        };
        let name = row
            .get(&spec.field_name_column)
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .unwrap_or_default();
        if name.trim().is_empty() {
            tracing::debug!(row = ?row, "skipping field defn row with no name");
            return None;
        }
        let type_name = row
            .get(&spec.field_type_column)
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .unwrap_or_default();
        let data_type = match type_name.parse::<DataType>() {
            Ok(t) => t,
            Err(_) => {
                tracing::debug!(row = ?row, field_type = %type_name, "skipping field defn row with unknown type");
                return None;
            }
        };
        let column = row
            .get(&spec.field_column_column)
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .filter(|c| !c.trim().is_empty());
        let key = if spec.case_insensitive {
            name.to_lowercase()
        } else {
            name
        };
        Some(FieldDefn {
            id,
            key,
            data_type,
            column,
        })
    }

    fn matches(&self, field_id: Option<&Value>) -> bool {
        let Some(v) = field_id else {
            return false;
        };
        if v.is_null() {
            return false;
        }
        if v.data_type() == self.id.data_type() {
            return self.id.total_cmp(v) == Ordering::Equal;
        }
        matches!(
            compare_as_common(self.id.data_type(), &self.id, v.data_type(), v),
            Ok(Ordering::Equal)
        )
    }

    fn cast(&self, value: &Value) -> Value {
        match self.data_type.cast(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(field = %self.key, value = %value, error = %e, "failed to cast dynamic field, using null");
                Value::Null
            }
        }
    }
}

#[derive(Clone)]
pub struct DynamicFields {
    fields: Vec<FieldDefn>,
    values_field_id_column: String,
    value_columns: Vec<String>,
}

impl DynamicFields {
    pub fn new(fields: Vec<FieldDefn>, spec: &PivotSpec) -> Self {
        Self {
            fields,
            values_field_id_column: spec.values_field_id_column.clone(),
            value_columns: spec.value_columns.clone(),
        }
    }

    /// Build from the rows of a field definition stream.
    pub fn from_rows(rows: &[Row], spec: &PivotSpec) -> Self {
        let fields = rows
            .iter()
            .filter_map(|r| FieldDefn::from_row(r, spec))
            .collect::<Vec<_>>();
        tracing::debug!(fields = fields.len(), skipped = rows.len() - fields.len(), "dynamic fields defined");
        Self::new(fields, spec)
    }

    pub fn fields(&self) -> &[FieldDefn] {
        &self.fields
    }

    /// The value a matching row supplies for `field`, or `None` if it supplies none.
    fn value_for(&self, field: &FieldDefn, row: &Row) -> Option<Value> {
        match &field.column {
            Some(column) => Some(match row.get(column) {
                Some(v) if !v.is_null() => field.cast(v),
                _ => Value::Null,
            }),
            None => self
                .value_columns
                .iter()
                .filter_map(|c| row.get(c))
                .find(|v| !v.is_null())
                .map(|v| field.cast(v)),
        }
    }
}

impl RowCombiner for DynamicFields {
    fn register_columns(&self, target: &Schema) -> Result<()> {
        for f in &self.fields {
            target.declare(&f.key, f.data_type)?;
        }
        Ok(())
    }

    fn combine(&self, mut primary: Row, matches: Vec<Row>) -> Result<Row> {
        for field in &self.fields {
            let found = matches
                .iter()
                .find(|r| field.matches(r.get(&self.values_field_id_column)));
            match found {
                Some(row) => {
                    if let Some(value) = self.value_for(field, row) {
                        primary.put(&field.key, value);
                    }
                }
                None => {
                    if !primary.contains(&field.key) {
                        primary.put(&field.key, Value::Null);
                    }
                }
            }
        }
        tracing::trace!(row = ?primary, "dynamic fields applied");
        Ok(primary)
    }
}
