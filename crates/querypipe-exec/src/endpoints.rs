//! In-memory endpoints declared next to a pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use querypipe_core::error::{Error, Result};
use querypipe_core::types::Value;
use querypipe_io::sql::{ColumnDescriptor, ConnectionPool, MemoryDatabase, QueryResult, SqlType};
use querypipe_planner::{EndpointDefn, QueryDefn};

/// Build one `MemoryDatabase` per declared endpoint, keyed by endpoint name.
pub fn memory_endpoints(
    defns: &BTreeMap<String, EndpointDefn>,
) -> Result<HashMap<String, Arc<dyn ConnectionPool>>> {
    let mut pools: HashMap<String, Arc<dyn ConnectionPool>> = HashMap::new();
    for (name, endpoint) in defns {
        let db = MemoryDatabase::new();
        for query in &endpoint.queries {
            db.register(&query.sql, query_result(name, query)?);
        }
        tracing::debug!(endpoint = %name, queries = endpoint.queries.len(), "registered in-memory endpoint");
        pools.insert(name.clone(), Arc::new(db));
    }
    Ok(pools)
}

fn query_result(endpoint: &str, query: &QueryDefn) -> Result<QueryResult> {
    let columns = query
        .columns
        .iter()
        .map(|c| {
            let sql_type = c.sql_type.parse::<SqlType>().map_err(|e| {
                Error::Config(format!("endpoint '{}' column '{}': {}", endpoint, c.name, e))
            })?;
            Ok(ColumnDescriptor::new(c.name.clone(), sql_type))
        })
        .collect::<Result<Vec<_>>>()?;
    let rows = query
        .rows
        .iter()
        .map(|r| r.iter().map(Value::from_json).collect())
        .collect();
    Ok(QueryResult::new(columns, rows))
}
