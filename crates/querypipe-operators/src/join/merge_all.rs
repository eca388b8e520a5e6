//! Copy the first matching secondary row's columns onto the primary row.

use querypipe_core::error::Result;
use querypipe_core::row::Row;
use querypipe_core::schema::{Field, Schema};
use querypipe_core::types::Value;

use super::RowCombiner;

pub struct MergeAll {
    secondary_keys: Vec<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    secondary_schema: Schema,
}

impl MergeAll {
    pub fn new(
        secondary_keys: Vec<String>,
        include: Vec<String>,
        exclude: Vec<String>,
        secondary_schema: Schema,
    ) -> Self {
        Self {
            secondary_keys,
            include,
            exclude,
            secondary_schema,
        }
    }

    fn copies(&self, column: &str) -> bool {
        if self.secondary_keys.iter().any(|k| k == column) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|c| c == column) {
            return false;
        }
        !self.exclude.iter().any(|c| c == column)
    }

    /// Secondary columns this merge copies, as currently declared.
    fn columns(&self) -> Vec<Field> {
        self.secondary_schema
            .fields()
            .into_iter()
            .filter(|f| self.copies(&f.name))
            .collect()
    }
}

impl RowCombiner for MergeAll {
    fn register_columns(&self, target: &Schema) -> Result<()> {
        for f in self.columns() {
            target.declare(&f.name, f.data_type)?;
        }
        Ok(())
    }

    fn combine(&self, mut primary: Row, matches: Vec<Row>) -> Result<Row> {
        let Some(first) = matches.into_iter().next() else {
            return Ok(primary);
        };
        let target = primary.schema().clone();
        for f in self.columns() {
            // columns the secondary gained after initialization
            target.declare(&f.name, f.data_type)?;
            let value = first.get(&f.name).cloned().unwrap_or(Value::Null);
            primary.put(&f.name, value);
        }
        Ok(primary)
    }
}
