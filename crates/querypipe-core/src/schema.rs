//! Logical types and the shared, append-only column table.
//!
//! One `Schema` handle is shared by every row of a stream. Declaring a column through
//! any handle is visible through all of them.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Value, DATETIME_FORMAT, TIME_FORMAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Long,
    Float,
    Double,
    String,
    Boolean,
    Date,
    DateTime,
    Time,
    /// Type not yet known; widens to whatever it meets.
    Null,
}

impl DataType {
    /// Rank on the numeric ladder, `None` for non-numeric types.
    fn numeric_rank(self) -> Option<u8> {
        match self {
            DataType::Boolean => Some(1),
            DataType::Integer => Some(2),
            DataType::Long => Some(3),
            DataType::Float => Some(4),
            DataType::Double => Some(5),
            _ => None,
        }
    }

    /// Smallest type both operands can be cast to.
    pub fn common_type(self, other: DataType) -> Result<DataType> {
        if self == other {
            return Ok(self);
        }
        match (self, other) {
            (DataType::Null, t) | (t, DataType::Null) => Ok(t),
            (DataType::String, _) | (_, DataType::String) => Ok(DataType::String),
            (a, b) => match (a.numeric_rank(), b.numeric_rank()) {
                (Some(ra), Some(rb)) => Ok(if ra >= rb { a } else { b }),
                _ => Err(Error::Cast(format!(
                    "No common type between {} and {}",
                    self, other
                ))),
            },
        }
    }

    /// Convert `value` into this type.
    pub fn cast(self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if value.data_type() == self {
            return Ok(value.clone());
        }
        let cast = match self {
            DataType::Null => Some(Value::Null),
            DataType::String => Some(Value::String(value.to_string())),
            DataType::Boolean => cast_boolean(value),
            DataType::Integer => {
                cast_integral(value).and_then(|i| i32::try_from(i).ok().map(Value::Integer))
            }
            DataType::Long => cast_integral(value).map(Value::Long),
            DataType::Float => cast_floating(value).map(|f| Value::Float(f as f32)),
            DataType::Double => cast_floating(value).map(Value::Double),
            DataType::Date => match value {
                Value::DateTime(dt) => Some(Value::Date(dt.date())),
                Value::String(s) => parse_date(s.trim()).map(Value::Date),
                _ => None,
            },
            DataType::DateTime => match value {
                Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::DateTime),
                Value::String(s) => parse_datetime(s.trim()).map(Value::DateTime),
                _ => None,
            },
            DataType::Time => match value {
                Value::DateTime(dt) => Some(Value::Time(dt.time())),
                Value::String(s) => parse_time(s.trim()).map(Value::Time),
                _ => None,
            },
        };
        cast.ok_or_else(|| {
            Error::Cast(format!(
                "cannot cast {} value '{}' to {}",
                value.data_type(),
                value,
                self
            ))
        })
    }
}

fn cast_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Integer(i) => Some(Value::Boolean(*i != 0)),
        Value::Long(i) => Some(Value::Boolean(*i != 0)),
        Value::Float(f) => Some(Value::Boolean(*f != 0.0)),
        Value::Double(f) => Some(Value::Boolean(*f != 0.0)),
        Value::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(Value::Boolean(true))
            } else if s.eq_ignore_ascii_case("false") {
                Some(Value::Boolean(false))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn cast_integral(value: &Value) -> Option<i64> {
    match value {
        Value::Boolean(b) => Some(i64::from(*b)),
        Value::Integer(i) => Some(i64::from(*i)),
        Value::Long(i) => Some(*i),
        Value::Float(f) => truncate(f64::from(*f)),
        Value::Double(f) => truncate(*f),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    }
}

fn truncate(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

fn cast_floating(value: &Value) -> Option<f64> {
    match value {
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Integer(i) => Some(f64::from(*i)),
        Value::Long(i) => Some(*i as f64),
        Value::Float(f) => Some(f64::from(*f)),
        Value::Double(f) => Some(*f),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    [DATETIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .or_else(|| NaiveTime::parse_from_str(s, "%H:%M").ok())
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "Integer",
            DataType::Long => "Long",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::String => "String",
            DataType::Boolean => "Boolean",
            DataType::Date => "Date",
            DataType::DateTime => "DateTime",
            DataType::Time => "Time",
            DataType::Null => "Null",
        };
        f.write_str(name)
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(DataType::Integer),
            "long" => Ok(DataType::Long),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "string" => Ok(DataType::String),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            "datetime" => Ok(DataType::DateTime),
            "time" => Ok(DataType::Time),
            "null" => Ok(DataType::Null),
            other => Err(Error::Schema(format!("unknown data type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Default)]
struct SchemaInner {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl SchemaInner {
    fn push(&mut self, name: &str, data_type: DataType) -> usize {
        let idx = self.fields.len();
        self.fields.push(Field::new(name, data_type));
        self.index.insert(name.to_string(), idx);
        idx
    }
}

/// Shared, append-only ordered column table.
///
/// Cloning yields another handle to the same table. Positions are stable: a column keeps
/// its index for the lifetime of the schema.
#[derive(Clone, Default)]
pub struct Schema {
    inner: Arc<RwLock<SchemaInner>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Result<Self> {
        let schema = Schema::new();
        for f in fields {
            schema.declare(&f.name, f.data_type)?;
        }
        Ok(schema)
    }

    /// Declare-if-absent.
    ///
    /// Re-declaring with the same type is a no-op, a `Null` column is upgraded to a
    /// concrete type, and declaring `Null` over a concrete type changes nothing. Any other
    /// conflict is a caller error.
    pub fn declare(&self, name: &str, data_type: DataType) -> Result<usize> {
        let mut inner = self.inner.write();
        match inner.index.get(name).copied() {
            None => Ok(inner.push(name, data_type)),
            Some(idx) => {
                let existing = inner.fields[idx].data_type;
                if existing == data_type || data_type == DataType::Null {
                    Ok(idx)
                } else if existing == DataType::Null {
                    inner.fields[idx].data_type = data_type;
                    Ok(idx)
                } else {
                    Err(Error::Schema(format!(
                        "column '{}' already declared as {}, cannot redeclare as {}",
                        name, existing, data_type
                    )))
                }
            }
        }
    }

    /// Lenient declaration used while populating rows: never fails and never changes a
    /// concrete type that is already recorded.
    pub fn index_or_declare(&self, name: &str, data_type: DataType) -> usize {
        if let Some(idx) = self.index_of(name) {
            if data_type != DataType::Null {
                let mut inner = self.inner.write();
                if inner.fields[idx].data_type == DataType::Null {
                    inner.fields[idx].data_type = data_type;
                }
            }
            return idx;
        }
        let mut inner = self.inner.write();
        // another handle may have declared it between the two locks
        match inner.index.get(name).copied() {
            Some(idx) => idx,
            None => inner.push(name, data_type),
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.read().index.get(name).copied()
    }

    pub fn data_type(&self, name: &str) -> Option<DataType> {
        let inner = self.inner.read();
        inner.index.get(name).map(|&idx| inner.fields[idx].data_type)
    }

    pub fn field(&self, idx: usize) -> Option<Field> {
        self.inner.read().fields.get(idx).cloned()
    }

    /// Snapshot of the columns declared so far, in declaration order.
    pub fn fields(&self) -> Vec<Field> {
        self.inner.read().fields.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same table.
    pub fn same_as(&self, other: &Schema) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_type_lattice() {
        use DataType::*;
        assert_eq!(Integer.common_type(Long).expect("numeric"), Long);
        assert_eq!(Long.common_type(Integer).expect("numeric"), Long);
        assert_eq!(Boolean.common_type(Float).expect("numeric"), Float);
        assert_eq!(Double.common_type(Integer).expect("numeric"), Double);
        assert_eq!(Null.common_type(Date).expect("null"), Date);
        assert_eq!(Date.common_type(Null).expect("null"), Date);
        assert_eq!(Date.common_type(String).expect("string"), String);
        assert_eq!(String.common_type(Long).expect("string"), String);
        assert_eq!(Time.common_type(Time).expect("same"), Time);
    }

    #[test]
    fn test_no_common_type() {
        let err = DataType::Long
            .common_type(DataType::Date)
            .expect_err("long vs date");
        assert_eq!(
            err,
            Error::Cast("No common type between Long and Date".to_string())
        );
        assert!(DataType::Date.common_type(DataType::DateTime).is_err());
        assert!(DataType::Time.common_type(DataType::Boolean).is_err());
    }

    #[test]
    fn test_cast_rules() {
        assert_eq!(
            DataType::Boolean.cast(&Value::Long(2)).expect("bool"),
            Value::Boolean(true)
        );
        assert_eq!(
            DataType::Boolean.cast(&Value::from("TRUE")).expect("bool"),
            Value::Boolean(true)
        );
        assert_eq!(
            DataType::Long.cast(&Value::Integer(5)).expect("long"),
            Value::Long(5)
        );
        assert_eq!(
            DataType::Integer.cast(&Value::from("42")).expect("int"),
            Value::Integer(42)
        );
        assert!(DataType::Integer.cast(&Value::Long(i64::MAX)).is_err());
        assert!(DataType::Integer.cast(&Value::from("abc")).is_err());
        assert_eq!(
            DataType::String.cast(&Value::Long(7)).expect("string"),
            Value::from("7")
        );
        assert_eq!(DataType::Date.cast(&Value::Null).expect("null"), Value::Null);
    }

    #[test]
    fn test_cast_temporal() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 2).expect("date");
        let dt = d.and_hms_opt(3, 4, 5).expect("datetime");
        assert_eq!(
            DataType::Date.cast(&Value::DateTime(dt)).expect("date"),
            Value::Date(d)
        );
        assert_eq!(
            DataType::DateTime.cast(&Value::Date(d)).expect("datetime"),
            Value::DateTime(d.and_hms_opt(0, 0, 0).expect("midnight"))
        );
        assert_eq!(
            DataType::DateTime
                .cast(&Value::from("2020-01-02T03:04:05"))
                .expect("parse"),
            Value::DateTime(dt)
        );
        assert_eq!(
            DataType::Date.cast(&Value::from("2020-01-02")).expect("parse"),
            Value::Date(d)
        );
        assert!(DataType::Date.cast(&Value::Long(1)).is_err());
    }

    #[test]
    fn test_declare_if_absent() {
        let schema = Schema::new();
        assert_eq!(schema.declare("id", DataType::Long).expect("declare"), 0);
        assert_eq!(schema.declare("name", DataType::String).expect("declare"), 1);
        assert_eq!(schema.declare("id", DataType::Long).expect("same type"), 0);
        assert!(schema.declare("id", DataType::String).is_err());
        assert_eq!(schema.data_type("id"), Some(DataType::Long));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_null_upgrades_but_never_downgrades() {
        let schema = Schema::new();
        schema.declare("v", DataType::Null).expect("declare");
        schema.declare("v", DataType::Date).expect("upgrade");
        assert_eq!(schema.data_type("v"), Some(DataType::Date));
        schema.declare("v", DataType::Null).expect("no-op");
        assert_eq!(schema.data_type("v"), Some(DataType::Date));
    }

    #[test]
    fn test_shared_handles() {
        let a = Schema::new();
        let b = a.clone();
        b.declare("x", DataType::Integer).expect("declare");
        assert_eq!(a.index_of("x"), Some(0));
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Schema::new()));
    }

    #[test]
    fn test_parse_type_names() {
        assert_eq!("Integer".parse::<DataType>().expect("parse"), DataType::Integer);
        assert_eq!("datetime".parse::<DataType>().expect("parse"), DataType::DateTime);
        assert!("decimal".parse::<DataType>().is_err());
    }
}
