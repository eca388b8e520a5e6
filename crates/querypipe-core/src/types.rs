//! Row values.
//!
//! A `Value` is the unit carried in a `Row` slot. Its natural `DataType` is what the
//! schema records when a column is declared from a value.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::schema::DataType;

pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Long(_) => DataType::Long,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Date(_) => DataType::Date,
            Value::DateTime(_) => DataType::DateTime,
            Value::Time(_) => DataType::Time,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Total order over values without any casting.
    ///
    /// Nulls sort first, same variants compare naturally (NaN greatest), mixed variants
    /// are ordered by variant rank.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Boolean(x), Boolean(y)) => x.cmp(y),
            (Integer(x), Integer(y)) => x.cmp(y),
            (Long(x), Long(y)) => x.cmp(y),
            (Float(x), Float(y)) => float_cmp(f64::from(*x), f64::from(*y)),
            (Double(x), Double(y)) => float_cmp(*x, *y),
            (String(x), String(y)) => x.cmp(y),
            (Date(x), Date(y)) => x.cmp(y),
            (DateTime(x), DateTime(y)) => x.cmp(y),
            (Time(x), Time(y)) => x.cmp(y),
            // Mixed types: order by variant order
            _ => type_order(self).cmp(&type_order(other)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use Value::*;
        match self {
            Null => serde_json::Value::Null,
            Boolean(b) => serde_json::Value::Bool(*b),
            Integer(i) => serde_json::Value::from(*i),
            Long(i) => serde_json::Value::from(*i),
            Float(f) => serde_json::Value::from(f64::from(*f)),
            Double(f) => serde_json::Value::from(*f),
            String(s) => serde_json::Value::String(s.clone()),
            Date(_) | DateTime(_) | Time(_) => serde_json::Value::String(self.to_string()),
        }
    }

    /// Untyped conversion from JSON. Integral numbers become `Long`, other numbers
    /// `Double`; arrays and objects are kept as their JSON text.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Long(i),
                None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    if x.is_nan() && y.is_nan() {
        Ordering::Equal
    } else if x.is_nan() {
        Ordering::Greater
    } else if y.is_nan() {
        Ordering::Less
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

fn type_order(v: &Value) -> u8 {
    use Value::*;
    match v {
        Null => 0,
        Boolean(_) => 1,
        Integer(_) => 2,
        Long(_) => 3,
        Float(_) => 4,
        Double(_) => 5,
        String(_) => 6,
        Date(_) => 7,
        DateTime(_) => 8,
        Time(_) => 9,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Value::*;
        match self {
            Null => f.write_str("null"),
            Boolean(b) => write!(f, "{}", b),
            Integer(i) => write!(f, "{}", i),
            Long(i) => write!(f, "{}", i),
            Float(v) => write!(f, "{}", v),
            Double(v) => write!(f, "{}", v),
            String(s) => f.write_str(s),
            Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}
