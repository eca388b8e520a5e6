//! Driver-facing interfaces.
//!
//! Every operation returns a `Ready` signal and may complete on any thread. The adapter
//! built on top of these never blocks waiting for one.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use querypipe_core::error::{Error, Result};
use querypipe_core::schema::DataType;
use querypipe_core::types::Value;
use querypipe_stream::Ready;

/// Column type as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Clob,
    NChar,
    NVarchar,
    Date,
    Time,
    TimeWithTimezone,
    Timestamp,
    TimestampWithTimezone,
    Null,
    Binary,
    Blob,
    Array,
    /// Vendor type, carried with its type name (e.g. `UUID`).
    Other(String),
}

/// Vendor types that are read as text.
const OTHER_TYPES_AS_STRING: &[&str] = &["UUID"];

impl SqlType {
    pub fn to_data_type(&self) -> Result<DataType> {
        use SqlType::*;
        match self {
            Boolean => Ok(DataType::Boolean),
            Bit | TinyInt | SmallInt | Integer => Ok(DataType::Integer),
            BigInt => Ok(DataType::Long),
            Float => Ok(DataType::Float),
            Real | Double | Numeric | Decimal => Ok(DataType::Double),
            Char | Varchar | LongVarchar | Clob | NChar | NVarchar => Ok(DataType::String),
            Date => Ok(DataType::Date),
            Time | TimeWithTimezone => Ok(DataType::Time),
            Timestamp | TimestampWithTimezone => Ok(DataType::DateTime),
            Null => Ok(DataType::Null),
            Other(name)
                if OTHER_TYPES_AS_STRING
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(name)) =>
            {
                Ok(DataType::String)
            }
            other => Err(Error::Source(format!(
                "Cannot process fields of type {:?}",
                other
            ))),
        }
    }
}

/// Parses JDBC-style type names, case-insensitively. Unrecognized names become `Other`.
impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use SqlType::*;
        let name = s.trim();
        if name.is_empty() {
            return Err(Error::Config("empty SQL type name".into()));
        }
        let t = match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Boolean,
            "BIT" => Bit,
            "TINYINT" => TinyInt,
            "SMALLINT" => SmallInt,
            "INTEGER" | "INT" => Integer,
            "BIGINT" => BigInt,
            "FLOAT" => Float,
            "REAL" => Real,
            "DOUBLE" => Double,
            "NUMERIC" => Numeric,
            "DECIMAL" => Decimal,
            "CHAR" => Char,
            "VARCHAR" => Varchar,
            "LONGVARCHAR" => LongVarchar,
            "CLOB" => Clob,
            "NCHAR" => NChar,
            "NVARCHAR" => NVarchar,
            "DATE" => Date,
            "TIME" => Time,
            "TIME_WITH_TIMEZONE" => TimeWithTimezone,
            "TIMESTAMP" => Timestamp,
            "TIMESTAMP_WITH_TIMEZONE" => TimestampWithTimezone,
            "NULL" => Null,
            "BINARY" => Binary,
            "BLOB" => Blob,
            "ARRAY" => Array,
            _ => Other(name.to_string()),
        };
        Ok(t)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }

    /// Resolve the column type, preferring an explicit override.
    pub fn data_type(&self, overrides: &BTreeMap<String, DataType>) -> Result<DataType> {
        match overrides.get(&self.name) {
            Some(t) => Ok(*t),
            None => self.sql_type.to_data_type(),
        }
    }
}

/// One page of cursor results. Column descriptors accompany every page; only the first
/// page's are used.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

pub trait ConnectionPool: Send + Sync {
    fn connection(&self) -> Ready<Arc<dyn SqlConnection>>;
}

pub trait SqlConnection: Send + Sync {
    fn prepare(&self, sql: &str) -> Ready<Arc<dyn PreparedStatement>>;
    fn begin(&self) -> Ready<Arc<dyn Transaction>>;
    fn close(&self) -> Ready<()>;
}

pub trait PreparedStatement: Send + Sync {
    fn cursor(&self, params: &[Value]) -> Arc<dyn Cursor>;
}

pub trait Cursor: Send + Sync {
    /// Read up to `count` rows.
    fn read(&self, count: usize) -> Ready<RowSet>;
    /// Whether another `read` may yield rows.
    fn has_more(&self) -> bool;
    fn close(&self) -> Ready<()>;
}

pub trait Transaction: Send + Sync {
    fn commit(&self) -> Ready<()>;
}
