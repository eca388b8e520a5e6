//! Rows declared inline in a pipeline definition.

use std::sync::Arc;

use querypipe_core::defn::StaticSourceDefn;
use querypipe_core::error::{Error, Result};
use querypipe_core::row::Row;
use querypipe_core::schema::Schema;
use querypipe_core::types::Value;
use querypipe_stream::{ExecContext, ListStream, ReadStream, Ready, TypedStream};

use crate::source::Source;

pub struct StaticSource {
    name: String,
    defn: StaticSourceDefn,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, defn: StaticSourceDefn) -> Self {
        Self {
            name: name.into(),
            defn,
        }
    }

    /// Type every declared row through the column list.
    pub fn rows(&self) -> Result<(Schema, Vec<Row>)> {
        let schema = Schema::from_fields(self.defn.columns.iter().cloned())?;
        let mut rows = Vec::with_capacity(self.defn.rows.len());
        for (i, raw) in self.defn.rows.iter().enumerate() {
            if raw.len() != self.defn.columns.len() {
                return Err(Error::Config(format!(
                    "{}: row {} has {} values but {} columns are declared",
                    self.name,
                    i,
                    raw.len(),
                    self.defn.columns.len()
                )));
            }
            let mut row = Row::new(&schema);
            for (field, v) in self.defn.columns.iter().zip(raw) {
                let value = field
                    .data_type
                    .cast(&Value::from_json(v))
                    .map_err(|e| {
                        Error::Config(format!("{}: row {} column {}: {}", self.name, i, field.name, e))
                    })?;
                row.put(&field.name, value);
            }
            rows.push(row);
        }
        Ok((schema, rows))
    }
}

impl Source for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(self: Box<Self>, ctx: &ExecContext) -> Ready<TypedStream> {
        match self.rows() {
            Ok((schema, rows)) => {
                tracing::debug!(source = %self.name, rows = rows.len(), "static source ready");
                let stream: Arc<dyn ReadStream<Row>> = Arc::new(ListStream::new(ctx, rows));
                Ready::done(TypedStream::new(stream, schema))
            }
            Err(e) => Ready::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypipe_core::schema::{DataType, Field};

    fn defn(rows: Vec<Vec<serde_json::Value>>) -> StaticSourceDefn {
        StaticSourceDefn {
            name: None,
            columns: vec![
                Field::new("id", DataType::Integer),
                Field::new("born", DataType::Date),
            ],
            rows,
        }
    }

    #[test]
    fn test_rows_are_typed() {
        let src = StaticSource::new(
            "people",
            defn(vec![vec![serde_json::json!(1), serde_json::json!("1971-05-06")]]),
        );
        let (schema, rows) = src.rows().expect("rows");
        assert_eq!(schema.data_type("born"), Some(DataType::Date));
        assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
        assert!(matches!(rows[0].get("born"), Some(Value::Date(_))));
    }

    #[test]
    fn test_bad_value_is_config_error() {
        let src = StaticSource::new(
            "people",
            defn(vec![vec![serde_json::json!("x"), serde_json::Value::Null]]),
        );
        assert!(matches!(src.rows(), Err(Error::Config(_))));
    }

    #[test]
    fn test_short_row_rejected() {
        let src = StaticSource::new("people", defn(vec![vec![serde_json::json!(1)]]));
        assert!(matches!(src.rows(), Err(Error::Config(_))));
    }
}
