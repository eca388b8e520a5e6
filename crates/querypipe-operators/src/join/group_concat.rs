//! Concatenate the values of every matching secondary row into string columns.
//!
//! Three modes, chosen by which value columns are configured:
//! - child and parent value column: the child column is concatenated into the parent
//!   column;
//! - child value column only: written under the child column's own name;
//! - neither: every non-key secondary column is concatenated under its own name.
//!
//! Nulls are skipped. A row without matches gets empty strings.

use querypipe_core::error::Result;
use querypipe_core::row::Row;
use querypipe_core::schema::{DataType, Schema};

use super::RowCombiner;

pub struct GroupConcat {
    secondary_keys: Vec<String>,
    delimiter: String,
    child_value_column: Option<String>,
    parent_value_column: Option<String>,
    secondary_schema: Schema,
}

impl GroupConcat {
    pub fn new(
        secondary_keys: Vec<String>,
        delimiter: String,
        child_value_column: Option<String>,
        parent_value_column: Option<String>,
        secondary_schema: Schema,
    ) -> Self {
        Self {
            secondary_keys,
            delimiter,
            child_value_column,
            parent_value_column,
            secondary_schema,
        }
    }

    /// (source column in the secondary rows, target column on the primary row)
    fn targets(&self) -> Vec<(String, String)> {
        match (&self.child_value_column, &self.parent_value_column) {
            (Some(child), Some(parent)) => vec![(child.clone(), parent.clone())],
            (Some(child), None) => vec![(child.clone(), child.clone())],
            (None, _) => self
                .secondary_schema
                .names()
                .into_iter()
                .filter(|n| !self.secondary_keys.contains(n))
                .map(|n| (n.clone(), n))
                .collect(),
        }
    }

    fn concat(&self, column: &str, matches: &[Row]) -> String {
        matches
            .iter()
            .filter_map(|r| r.get(column))
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }
}

impl RowCombiner for GroupConcat {
    fn register_columns(&self, target: &Schema) -> Result<()> {
        for (_, column) in self.targets() {
            target.declare(&column, DataType::String)?;
        }
        Ok(())
    }

    fn combine(&self, mut primary: Row, matches: Vec<Row>) -> Result<Row> {
        tracing::trace!(matches = matches.len(), "concatenating child rows");
        for (source, target) in self.targets() {
            let joined = self.concat(&source, &matches);
            // child columns that appeared after registration
            primary.schema().declare(&target, DataType::String)?;
            primary.put(&target, joined.into());
        }
        Ok(primary)
    }
}
