//! Row ordering on join key columns, aware of each column's declared type.

use std::cmp::Ordering;

use querypipe_core::error::{Error, Result};
use querypipe_core::row::Row;
use querypipe_core::schema::DataType;
use querypipe_core::types::Value;

#[derive(Debug, Clone)]
pub struct KeyComparator {
    primary_columns: Vec<String>,
    secondary_columns: Vec<String>,
    strict: bool,
}

impl KeyComparator {
    pub fn new(primary_columns: Vec<String>, secondary_columns: Vec<String>, strict: bool) -> Self {
        Self {
            primary_columns,
            secondary_columns,
            strict,
        }
    }

    /// Compare the primary row's keys with the secondary row's keys, position by
    /// position. A missing key value orders as null.
    pub fn compare(&self, primary: &Row, secondary: &Row) -> Result<Ordering> {
        for (pc, sc) in self.primary_columns.iter().zip(&self.secondary_columns) {
            let ord = self.compare_column(primary, pc, secondary, sc)?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    fn compare_column(&self, primary: &Row, pc: &str, secondary: &Row, sc: &str) -> Result<Ordering> {
        let null = Value::Null;
        let pv = primary.get(pc).unwrap_or(&null);
        let sv = secondary.get(sc).unwrap_or(&null);
        let pt = primary.schema().data_type(pc).unwrap_or(DataType::Null);
        let st = secondary.schema().data_type(sc).unwrap_or(DataType::Null);

        if pt == st {
            return Ok(pv.total_cmp(sv));
        }
        match compare_as_common(pt, pv, st, sv) {
            Ok(ord) => Ok(ord),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                tracing::warn!(
                    primary = %pc,
                    secondary = %sc,
                    error = %e,
                    "key comparison fell back to raw values"
                );
                Ok(pv.total_cmp(sv))
            }
        }
    }
}

/// Compare two values after casting both to the common type of their columns.
pub fn compare_as_common(lt: DataType, lv: &Value, rt: DataType, rv: &Value) -> Result<Ordering> {
    let common = lt.common_type(rt)?;
    let l = common.cast(lv)?;
    let r = common.cast(rv)?;
    if !l.is_null() && !r.is_null() && l.data_type() != r.data_type() {
        return Err(Error::Cast(format!(
            "cast of {} and {} to {} disagreed",
            lt, rt, common
        )));
    }
    Ok(l.total_cmp(&r))
}
