//! Fill fields from an in-memory key/value map loaded from a nested pipeline.
//!
//! The whole map pipeline is read before the processor resolves, so it has to fit in
//! memory. Rows flow through one-for-one afterwards: every configured key column is
//! looked up and, on a hit, the mapped value is written to its value column. Misses and
//! null keys leave the row alone.

use std::collections::HashMap;
use std::sync::Arc;

use querypipe_core::defn::{LookupDefn, LookupField};
use querypipe_core::error::{Error, Result};
use querypipe_core::row::Row;
use querypipe_core::schema::{DataType, Schema};
use querypipe_core::types::Value;
use querypipe_stream::protocol::{detach, on_data};
use querypipe_stream::{
    capture, DataHandler, EndHandler, ErrorHandler, ReadStream, Ready, TypedStream,
};

use crate::traits::{PipelineFactory, Processor};

/// Hashable form of a key value. Integral numbers compare equal across widths, so an
/// `Integer` key finds a `Long` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LookupKey {
    Boolean(bool),
    Integral(i64),
    Floating(u64),
    Text(String),
    Temporal(DataType, String),
}

impl LookupKey {
    fn of(value: &Value) -> Option<LookupKey> {
        match value {
            Value::Null => None,
            Value::Boolean(b) => Some(LookupKey::Boolean(*b)),
            Value::Integer(i) => Some(LookupKey::Integral(i64::from(*i))),
            Value::Long(i) => Some(LookupKey::Integral(*i)),
            Value::Float(f) => Some(Self::floating(f64::from(*f))),
            Value::Double(f) => Some(Self::floating(*f)),
            Value::String(s) => Some(LookupKey::Text(s.clone())),
            Value::Date(_) | Value::DateTime(_) | Value::Time(_) => {
                Some(LookupKey::Temporal(value.data_type(), value.to_string()))
            }
        }
    }

    fn floating(f: f64) -> LookupKey {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            LookupKey::Integral(f as i64)
        } else {
            LookupKey::Floating(f.to_bits())
        }
    }
}

/// The loaded map plus the fields it is applied to.
pub struct LookupTable {
    entries: HashMap<LookupKey, Value>,
    fields: Vec<LookupField>,
}

impl LookupTable {
    /// Build from captured map rows. Rows without a key are skipped; a repeated key
    /// keeps the last value.
    pub fn from_rows(
        rows: &[Row],
        key_field: &str,
        value_field: &str,
        fields: Vec<LookupField>,
    ) -> Self {
        let mut entries = HashMap::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in rows {
            match row.get(key_field).and_then(LookupKey::of) {
                Some(key) => {
                    entries.insert(key, row.get_or_null(value_field));
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "lookup rows without a key");
        }
        Self { entries, fields }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        LookupKey::of(key).and_then(|k| self.entries.get(&k))
    }

    pub fn apply(&self, mut row: Row) -> Row {
        for field in &self.fields {
            let hit = row
                .get(&field.key_field)
                .and_then(|k| self.get(k))
                .filter(|v| !v.is_null())
                .cloned();
            if let Some(value) = hit {
                row.put(&field.value_field, value);
            }
        }
        row
    }
}

/// Maps every upstream row through a `LookupTable`. Demand, pause and termination pass
/// straight through.
pub struct LookupStream {
    upstream: Arc<dyn ReadStream<Row>>,
    table: Arc<LookupTable>,
}

impl LookupStream {
    pub fn new(upstream: Arc<dyn ReadStream<Row>>, table: Arc<LookupTable>) -> Self {
        Self { upstream, table }
    }
}

impl ReadStream<Row> for LookupStream {
    fn set_data_handler(&self, handler: Option<DataHandler<Row>>) {
        let mapped = handler.and_then(|h| {
            let table = Arc::clone(&self.table);
            on_data(move |row: Row| h(table.apply(row)))
        });
        self.upstream.set_data_handler(mapped);
    }

    fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.upstream.set_error_handler(handler);
    }

    fn set_end_handler(&self, handler: Option<EndHandler>) {
        self.upstream.set_end_handler(handler);
    }

    fn pause(&self) {
        self.upstream.pause();
    }

    fn resume(&self) {
        self.upstream.resume();
    }

    fn fetch(&self, n: u64) {
        self.upstream.fetch(n);
    }
}

/// Build-time checks shared with the planner.
pub fn validate_lookup(defn: &LookupDefn) -> Result<()> {
    if defn.lookup_key_field.trim().is_empty() {
        return Err(Error::Config("lookup_key_field not specified for lookup map".into()));
    }
    if defn.lookup_value_field.trim().is_empty() {
        return Err(Error::Config("lookup_value_field not specified for lookup map".into()));
    }
    if defn.lookup_fields.is_empty() {
        return Err(Error::Config("no lookup_fields given".into()));
    }
    for (i, f) in defn.lookup_fields.iter().enumerate() {
        if f.key_field.trim().is_empty() || f.value_field.trim().is_empty() {
            return Err(Error::Config(format!(
                "lookup_fields[{}] needs both key_field and value_field",
                i
            )));
        }
    }
    Ok(())
}

pub struct Lookup {
    name: String,
    defn: LookupDefn,
}

impl Lookup {
    pub fn new(name: impl Into<String>, defn: &LookupDefn) -> Result<Self> {
        validate_lookup(defn)?;
        Ok(Self {
            name: name.into(),
            defn: defn.clone(),
        })
    }
}

impl Processor for Lookup {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        self: Box<Self>,
        factory: Arc<dyn PipelineFactory>,
        input: TypedStream,
    ) -> Ready<TypedStream> {
        let Lookup { name, defn } = *self;
        tracing::debug!(
            processor = %name,
            key = %defn.lookup_key_field,
            value = %defn.lookup_value_field,
            fields = defn.lookup_fields.len(),
            "initializing lookup"
        );
        let map_name = format!("{}.map", name);
        let primary = input.clone();
        let build_name = name.clone();
        factory
            .initialize_sub_pipeline(&defn.map, &map_name)
            .and_then(|ts| {
                let schema = ts.schema.clone();
                capture(ts.stream).map(move |rows| (schema, rows))
            })
            .try_map(move |(map_schema, rows)| {
                build_lookup(&build_name, &defn, &map_schema, &rows, primary)
            })
            .on_failure(move |e| {
                tracing::warn!(processor = %name, error = %e, "lookup failed to initialize");
                detach(input.stream.as_ref());
            })
    }
}

fn build_lookup(
    name: &str,
    defn: &LookupDefn,
    map_schema: &Schema,
    rows: &[Row],
    primary: TypedStream,
) -> Result<TypedStream> {
    for column in [&defn.lookup_key_field, &defn.lookup_value_field] {
        if map_schema.index_of(column).is_none() {
            return Err(Error::Config(format!(
                "{}: lookup map has no column '{}'",
                name, column
            )));
        }
    }
    let value_type = map_schema
        .data_type(&defn.lookup_value_field)
        .unwrap_or(DataType::Null);
    for f in &defn.lookup_fields {
        primary
            .schema
            .declare(&f.value_field, value_type)
            .map_err(|e| match e {
                Error::Schema(msg) => Error::Schema(format!("{}: {}", name, msg)),
                other => other,
            })?;
    }
    let table = LookupTable::from_rows(
        rows,
        &defn.lookup_key_field,
        &defn.lookup_value_field,
        defn.lookup_fields.clone(),
    );
    tracing::info!(processor = %name, mappings = table.len(), "lookup map loaded");
    let stream: Arc<dyn ReadStream<Row>> =
        Arc::new(LookupStream::new(primary.stream, Arc::new(table)));
    Ok(TypedStream::new(stream, primary.schema))
}
