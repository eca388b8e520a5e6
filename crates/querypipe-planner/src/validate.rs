//! Build-time checks over a parsed pipeline.
//!
//! Nothing here opens a stream. Each join is validated by building its descriptor, the
//! same way the executor will when it instantiates the processor.

use std::collections::HashSet;

use querypipe_core::defn::{Pipeline, ProcessorDefn, SourceDefn, SourcePipeline};
use querypipe_core::error::{Error, Result};
use querypipe_operators::{validate_lookup, JoinDescriptor};

use crate::dsl::yaml::ParsedPipeline;

/// Validate the engine overrides and every nested source pipeline.
pub fn validate_pipeline(pipeline: &Pipeline) -> Result<()> {
    if let Some(cfg) = &pipeline.config {
        cfg.validate()?;
    }
    validate_source_pipeline(&pipeline.body, "pipeline")
}

/// Like `validate_pipeline`, and also checks that every SQL source names a declared
/// endpoint and one of its registered queries.
pub fn validate_parsed(parsed: &ParsedPipeline) -> Result<()> {
    validate_pipeline(&parsed.pipeline)?;
    for (name, endpoint) in &parsed.endpoints {
        let mut seen = HashSet::new();
        for q in &endpoint.queries {
            if !seen.insert(q.sql.trim()) {
                return Err(Error::Config(format!(
                    "endpoint '{}' declares query '{}' twice",
                    name, q.sql
                )));
            }
            for (i, row) in q.rows.iter().enumerate() {
                if row.len() != q.columns.len() {
                    return Err(Error::Config(format!(
                        "endpoint '{}': row {} of '{}' has {} values for {} columns",
                        name,
                        i,
                        q.sql,
                        row.len(),
                        q.columns.len()
                    )));
                }
            }
        }
    }
    let mut check = |src: &SourceDefn| -> Result<()> {
        let SourceDefn::Sql(sql) = src else {
            return Ok(());
        };
        let endpoint = parsed.endpoints.get(&sql.endpoint).ok_or_else(|| {
            Error::Config(format!("unknown endpoint '{}'", sql.endpoint))
        })?;
        if !endpoint.queries.iter().any(|q| q.sql.trim() == sql.query.trim()) {
            return Err(Error::Config(format!(
                "endpoint '{}' has no query '{}'",
                sql.endpoint, sql.query
            )));
        }
        Ok(())
    };
    visit_sources(&parsed.pipeline.body, &mut check)
}

fn validate_source_pipeline(p: &SourcePipeline, path: &str) -> Result<()> {
    validate_source(&p.source, path)?;
    for (i, proc) in p.processors.iter().enumerate() {
        let here = format!("{}.processors[{}]", path, i);
        match proc {
            ProcessorDefn::Merge(m) => {
                JoinDescriptor::for_merge(m).map_err(|e| at(&here, e))?;
                validate_source_pipeline(&m.input, &format!("{}.input", here))?;
            }
            ProcessorDefn::GroupConcat(gc) => {
                JoinDescriptor::for_group_concat(gc).map_err(|e| at(&here, e))?;
                validate_source_pipeline(&gc.input, &format!("{}.input", here))?;
            }
            ProcessorDefn::DynamicField(df) => {
                JoinDescriptor::for_dynamic_field(df).map_err(|e| at(&here, e))?;
                validate_source_pipeline(&df.field_defns, &format!("{}.field_defns", here))?;
                validate_source_pipeline(&df.field_values, &format!("{}.field_values", here))?;
            }
            ProcessorDefn::Lookup(l) => {
                validate_lookup(l).map_err(|e| at(&here, e))?;
                validate_source_pipeline(&l.map, &format!("{}.map", here))?;
            }
            ProcessorDefn::Limit { .. } | ProcessorDefn::Offset { .. } => {}
        }
    }
    Ok(())
}

fn validate_source(src: &SourceDefn, path: &str) -> Result<()> {
    match src {
        SourceDefn::Sql(sql) => {
            if sql.endpoint.trim().is_empty() {
                return Err(Error::Config(format!("{}: sql source needs an endpoint", path)));
            }
            if sql.query.trim().is_empty() {
                return Err(Error::Config(format!("{}: sql source needs a query", path)));
            }
            if sql.fetch_size == Some(0) {
                return Err(Error::Config(format!("{}: fetch_size must be positive", path)));
            }
        }
        SourceDefn::Static(st) => {
            for (i, row) in st.rows.iter().enumerate() {
                if row.len() != st.columns.len() {
                    return Err(Error::Config(format!(
                        "{}: static row {} has {} values for {} columns",
                        path,
                        i,
                        row.len(),
                        st.columns.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Call `f` on every source, nested ones included.
pub fn visit_sources<F>(p: &SourcePipeline, f: &mut F) -> Result<()>
where
    F: FnMut(&SourceDefn) -> Result<()>,
{
    f(&p.source)?;
    for proc in &p.processors {
        match proc {
            ProcessorDefn::Merge(m) => visit_sources(&m.input, f)?,
            ProcessorDefn::GroupConcat(gc) => visit_sources(&gc.input, f)?,
            ProcessorDefn::DynamicField(df) => {
                visit_sources(&df.field_defns, f)?;
                visit_sources(&df.field_values, f)?;
            }
            ProcessorDefn::Lookup(l) => visit_sources(&l.map, f)?,
            ProcessorDefn::Limit { .. } | ProcessorDefn::Offset { .. } => {}
        }
    }
    Ok(())
}

fn at(path: &str, err: Error) -> Error {
    match err {
        Error::Config(msg) => Error::Config(format!("{}: {}", path, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::yaml::parse_yaml_pipeline;

    const VALID: &str = r#"
endpoints:
  main:
    queries:
      - sql: "select id from parent"
        columns: [ { name: id, type: BIGINT } ]
      - sql: "select parent_id, tag from tags"
        columns: [ { name: parent_id, type: BIGINT }, { name: tag, type: VARCHAR } ]
source: { type: sql, endpoint: main, query: "select id from parent" }
processors:
  - type: group_concat
    parent_id_columns: [id]
    child_id_columns: [parent_id]
    child_value_column: tag
    input:
      source: { type: sql, endpoint: main, query: "select parent_id, tag from tags" }
"#;

    #[test]
    fn test_valid_pipeline() {
        let parsed = parse_yaml_pipeline(VALID).expect("parse");
        validate_parsed(&parsed).expect("valid");
    }

    #[test]
    fn test_nested_key_mismatch_reported_with_path() {
        let yaml = VALID.replace("child_id_columns: [parent_id]", "child_id_columns: [parent_id, tag]");
        let parsed = parse_yaml_pipeline(&yaml).expect("parse");
        match validate_pipeline(&parsed.pipeline) {
            Err(Error::Config(msg)) => assert!(msg.starts_with("pipeline.processors[0]"), "{}", msg),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_query_rejected() {
        let yaml = VALID.replace("query: \"select parent_id, tag from tags\"", "query: \"select 1\"");
        let parsed = parse_yaml_pipeline(&yaml).expect("parse");
        validate_pipeline(&parsed.pipeline).expect("structure is fine");
        assert!(matches!(validate_parsed(&parsed), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_watermarks_rejected() {
        let yaml = format!(
            "config: {{ primary_high_watermark: 2, primary_low_watermark: 5 }}\n{}",
            VALID
        );
        let parsed = parse_yaml_pipeline(&yaml).expect("parse");
        assert!(matches!(validate_pipeline(&parsed.pipeline), Err(Error::Config(_))));
    }

    #[test]
    fn test_lookup_without_fields_rejected_with_path() {
        let yaml = r#"
source: { type: static, columns: [ { name: country, type: String } ] }
processors:
  - type: limit
    limit: 5
  - type: lookup
    lookup_key_field: code
    lookup_value_field: label
    lookup_fields: []
    map:
      source: { type: static, columns: [ { name: code, type: String } ], rows: [ [nz, extra] ] }
"#;
        let parsed = parse_yaml_pipeline(yaml).expect("parse");
        match validate_pipeline(&parsed.pipeline) {
            Err(Error::Config(msg)) => {
                assert!(msg.starts_with("pipeline.processors[1]:"), "{}", msg)
            }
            other => panic!("expected config error, got {:?}", other),
        }
        let fixed = yaml.replace("lookup_fields: []", "lookup_fields: [ { key_field: country, value_field: name } ]");
        let parsed = parse_yaml_pipeline(&fixed).expect("parse");
        match validate_pipeline(&parsed.pipeline) {
            Err(Error::Config(msg)) => {
                assert!(msg.starts_with("pipeline.processors[1].map"), "{}", msg)
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
