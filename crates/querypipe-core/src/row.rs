//! Rows over a shared schema.

use std::fmt;

use crate::error::Result;
use crate::schema::{DataType, Schema};
use crate::types::Value;

/// One record. Slots are indexed by the column's stable schema position; `None` means
/// the column is not populated in this row, `Some(Value::Null)` is an explicit null.
#[derive(Clone)]
pub struct Row {
    schema: Schema,
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(schema: &Schema) -> Self {
        Self {
            schema: schema.clone(),
            values: Vec::new(),
        }
    }

    pub fn from_values<K, V>(schema: &Schema, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut row = Row::new(schema);
        for (k, v) in values {
            row.put(k.as_ref(), v.into());
        }
        row
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self.schema.index_of(name)?;
        self.values.get(idx).and_then(|v| v.as_ref())
    }

    /// Like `get`, but an unpopulated column reads as `Null`.
    pub fn get_or_null(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Store a value, declaring the column from the value's type if it is absent.
    pub fn put(&mut self, name: &str, value: Value) {
        let idx = self.schema.index_or_declare(name, value.data_type());
        self.set(idx, value);
    }

    /// Store a value under a strictly declared column type.
    pub fn put_typed(&mut self, name: &str, data_type: DataType, value: Value) -> Result<()> {
        let idx = self.schema.declare(name, data_type)?;
        self.set(idx, value);
        Ok(())
    }

    fn set(&mut self, idx: usize, value: Value) {
        if self.values.len() <= idx {
            self.values.resize(idx + 1, None);
        }
        self.values[idx] = Some(value);
    }

    /// Number of populated columns.
    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Populated columns in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (String, &Value)> + '_ {
        let names = self.schema.names();
        self.values
            .iter()
            .enumerate()
            .filter_map(move |(idx, v)| {
                let v = v.as_ref()?;
                names.get(idx).map(|n| (n.clone(), v))
            })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(name, v)| (name, v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
