//! Streaming NDJSON writer.

use std::fs::File;
use std::io::{BufWriter, Write};

use querypipe_core::row::Row;

use crate::error::Result;

/// One JSON object per row, keys in schema order. Unpopulated columns are omitted.
pub struct JsonlWriter<W: Write> {
    writer: BufWriter<W>,
    rows: u64,
}

impl JsonlWriter<File> {
    pub fn to_path(path: &str) -> Result<Self> {
        let f = File::create(path)?;
        Ok(Self::to_writer(f))
    }
}

impl<W: Write> JsonlWriter<W> {
    pub fn to_writer(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            rows: 0,
        }
    }

    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let line = serde_json::to_string(&row.to_json())?;
        writeln!(self.writer, "{}", line)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::Error::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypipe_core::schema::Schema;
    use querypipe_core::types::Value;

    #[test]
    fn test_writes_lines() {
        let schema = Schema::new();
        let mut w = JsonlWriter::to_writer(Vec::new());
        w.write_row(&Row::from_values(&schema, [("id", Value::Long(1)), ("name", Value::from("a"))]))
            .expect("write");
        w.write_row(&Row::from_values(&schema, [("id", Value::Long(2))]))
            .expect("write");
        let out = String::from_utf8(w.into_inner().expect("inner")).expect("utf8");
        assert_eq!(out, "{\"id\":1,\"name\":\"a\"}\n{\"id\":2}\n");
    }
}
