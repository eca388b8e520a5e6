//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use querypipe_core::defn::StaticSourceDefn;
use querypipe_core::prelude::*;
use querypipe_io::sql::{ColumnDescriptor, MemoryDatabase, QueryResult, SqlType};
use querypipe_stream::{ExecContext, ListStream, ReadStream, Ready};

/// Small deterministic generator so runs are reproducible without extra crates.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n.max(1)
    }
}

/// `n` strictly increasing keys with random gaps of 1..=3.
pub fn unique_sorted_keys(n: usize, seed: u64) -> Vec<i64> {
    let mut rng = Lcg::new(seed);
    let mut key = 0i64;
    (0..n)
        .map(|_| {
            key += 1 + rng.below(3) as i64;
            key
        })
        .collect()
}

/// Sorted keys in `0..=max_key`, each present 0..=`max_dup` times.
pub fn duplicated_sorted_keys(max_key: i64, max_dup: u64, seed: u64) -> Vec<i64> {
    let mut rng = Lcg::new(seed);
    let mut out = Vec::new();
    for k in 0..=max_key {
        for _ in 0..rng.below(max_dup + 1) {
            out.push(k);
        }
    }
    out
}

pub fn schema(fields: &[(&str, DataType)]) -> Schema {
    Schema::from_fields(fields.iter().map(|(n, t)| Field::new(*n, *t))).expect("schema")
}

pub fn row(schema: &Schema, values: &[(&str, Value)]) -> Row {
    Row::from_values(schema, values.iter().cloned())
}

pub fn list<T: Send + 'static>(ctx: &ExecContext, items: Vec<T>) -> Arc<dyn ReadStream<T>> {
    Arc::new(ListStream::new(ctx, items))
}

pub fn static_source(columns: &[(&str, DataType)], rows: Vec<Vec<serde_json::Value>>) -> SourceDefn {
    SourceDefn::Static(StaticSourceDefn {
        name: None,
        columns: columns.iter().map(|(n, t)| Field::new(*n, *t)).collect(),
        rows,
    })
}

pub fn sql_columns(columns: &[(&str, SqlType)]) -> Vec<ColumnDescriptor> {
    columns
        .iter()
        .map(|(n, t)| ColumnDescriptor::new(*n, t.clone()))
        .collect()
}

pub fn register(db: &MemoryDatabase, sql: &str, columns: &[(&str, SqlType)], rows: Vec<Vec<Value>>) {
    db.register(sql, QueryResult::new(sql_columns(columns), rows));
}

/// Drive `ctx` until `ready` settles and return its outcome.
pub fn drive<T: Clone + Send + 'static>(ctx: &ExecContext, ready: &Ready<T>) -> Result<T> {
    let watched = ready.clone();
    assert!(
        ctx.run_until(|| watched.is_complete(), Duration::from_secs(10)),
        "signal did not settle"
    );
    ready.result().expect("settled")
}

pub fn column_values(rows: &[Row], column: &str) -> Vec<Value> {
    rows.iter().map(|r| r.get_or_null(column)).collect()
}
