//! Pipeline YAML parsing, validation and explain.

use querypipe_core::config::EngineConfig;
use querypipe_core::defn::{ProcessorDefn, SourceDefn};
use querypipe_core::error::Error;
use querypipe_core::schema::DataType;
use querypipe_planner::{explain, parse_yaml_pipeline, validate_parsed, validate_pipeline, PlanError};

const ORDERS: &str = r#"
config:
  fetch_size: 250
endpoints:
  shop:
    queries:
      - sql: "select id, customer from orders order by id"
        columns: [ { name: id, type: BIGINT }, { name: customer, type: VARCHAR } ]
        rows: [ [1, "ann"], [2, "bob"] ]
      - sql: "select order_id, sku from lines order by order_id"
        columns: [ { name: order_id, type: BIGINT }, { name: sku, type: VARCHAR } ]
        rows: [ [1, "A-1"], [1, "B-2"] ]
      - sql: "select id, name, type, column from attrs"
        columns:
          - { name: id, type: INTEGER }
          - { name: name, type: VARCHAR }
          - { name: type, type: VARCHAR }
          - { name: column, type: VARCHAR }
      - sql: "select order_id, attr_id, text_value from attr_values order by order_id"
        columns:
          - { name: order_id, type: BIGINT }
          - { name: attr_id, type: INTEGER }
          - { name: text_value, type: VARCHAR }
source:
  type: sql
  endpoint: shop
  query: "select id, customer from orders order by id"
  column_types: { customer: String }
processors:
  - type: group_concat
    parent_id_columns: [id]
    child_id_columns: [order_id]
    child_value_column: sku
    parent_value_column: skus
    delimiter: "; "
    input:
      source: { type: sql, endpoint: shop, query: "select order_id, sku from lines order by order_id", fetch_size: 2 }
  - type: dynamic_field
    parent_id_columns: [id]
    values_parent_id_columns: [order_id]
    values_field_id_column: attr_id
    field_value_column_name: text_value
    use_case_insensitive_field_names: true
    field_defns:
      source: { type: sql, endpoint: shop, query: "select id, name, type, column from attrs" }
    field_values:
      source: { type: sql, endpoint: shop, query: "select order_id, attr_id, text_value from attr_values order by order_id" }
  - type: offset
    offset: 1
  - type: limit
    limit: 5
"#;

#[test]
fn test_parse_full_pipeline() {
    let parsed = parse_yaml_pipeline(ORDERS).expect("parse");
    let body = &parsed.pipeline.body;

    match &body.source {
        SourceDefn::Sql(sql) => {
            assert_eq!(sql.endpoint, "shop");
            assert_eq!(sql.fetch_size, None);
            assert_eq!(sql.column_types.get("customer"), Some(&DataType::String));
        }
        other => panic!("unexpected source {:?}", other),
    }
    let kinds: Vec<&str> = body.processors.iter().map(|p| p.kind()).collect();
    assert_eq!(kinds, vec!["group_concat", "dynamic_field", "offset", "limit"]);

    match &body.processors[0] {
        ProcessorDefn::GroupConcat(gc) => {
            assert_eq!(gc.delimiter, "; ");
            assert_eq!(gc.parent_value_column.as_deref(), Some("skus"));
            match &gc.input.source {
                SourceDefn::Sql(sql) => assert_eq!(sql.fetch_size, Some(2)),
                other => panic!("unexpected input {:?}", other),
            }
        }
        other => panic!("unexpected processor {:?}", other),
    }
    match &body.processors[1] {
        ProcessorDefn::DynamicField(df) => {
            assert!(df.use_case_insensitive_field_names);
            assert!(!df.inner_join);
            assert_eq!(df.field_id_column, "id");
            assert_eq!(df.field_value_column_name.as_deref(), Some("text_value"));
        }
        other => panic!("unexpected processor {:?}", other),
    }
    assert_eq!(parsed.endpoints["shop"].queries.len(), 4);
}

#[test]
fn test_config_block_fills_defaults() {
    let parsed = parse_yaml_pipeline(ORDERS).expect("parse");
    let cfg = parsed.pipeline.config.expect("config");
    let defaults = EngineConfig::default();
    assert_eq!(cfg.fetch_size, 250);
    assert_eq!(cfg.secondary_high_watermark, defaults.secondary_high_watermark);
    assert_eq!(cfg.output_batch_size, defaults.output_batch_size);
    assert!(!cfg.strict_key_comparison);
}

#[test]
fn test_full_pipeline_validates() {
    let parsed = parse_yaml_pipeline(ORDERS).expect("parse");
    validate_parsed(&parsed).expect("valid");
}

#[test]
fn test_parse_invalid_yaml() {
    assert!(matches!(parse_yaml_pipeline("source: ["), Err(PlanError::Yaml(_))));
}

#[test]
fn test_parse_missing_source() {
    let yaml = r#"
processors:
  - type: limit
    limit: 1
"#;
    assert!(parse_yaml_pipeline(yaml).is_err());
}

#[test]
fn test_parse_unknown_data_type() {
    let yaml = r#"
source: { type: static, columns: [ { name: id, type: Decimal128 } ] }
"#;
    assert!(parse_yaml_pipeline(yaml).is_err());
}

#[test]
fn test_merge_requires_matching_key_counts() {
    let yaml = r#"
source: { type: static, columns: [ { name: id, type: Long } ] }
processors:
  - type: merge
    parent_id_columns: [id]
    child_id_columns: []
    input:
      source: { type: static, columns: [ { name: parent_id, type: Long } ] }
"#;
    let parsed = parse_yaml_pipeline(yaml).expect("parse");
    match validate_pipeline(&parsed.pipeline) {
        Err(Error::Config(msg)) => assert!(msg.contains("processors[0]"), "{}", msg),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_parent_value_column_needs_child_column() {
    let yaml = r#"
source: { type: static, columns: [ { name: id, type: Long } ] }
processors:
  - type: group_concat
    parent_id_columns: [id]
    child_id_columns: [parent_id]
    parent_value_column: tags
    input:
      source: { type: static, columns: [ { name: parent_id, type: Long } ] }
"#;
    let parsed = parse_yaml_pipeline(yaml).expect("parse");
    assert!(matches!(validate_pipeline(&parsed.pipeline), Err(Error::Config(_))));
}

#[test]
fn test_static_row_width_checked() {
    let yaml = r#"
source:
  type: static
  columns: [ { name: id, type: Long }, { name: name, type: String } ]
  rows: [ [1, "a"], [2] ]
"#;
    let parsed = parse_yaml_pipeline(yaml).expect("parse");
    match validate_pipeline(&parsed.pipeline) {
        Err(Error::Config(msg)) => assert!(msg.contains("static row 1"), "{}", msg),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_unknown_endpoint_rejected() {
    let yaml = ORDERS.replace("endpoint: shop, query: \"select order_id, sku", "endpoint: warehouse, query: \"select order_id, sku");
    let parsed = parse_yaml_pipeline(&yaml).expect("parse");
    validate_pipeline(&parsed.pipeline).expect("structure is fine");
    match validate_parsed(&parsed) {
        Err(Error::Config(msg)) => assert!(msg.contains("warehouse"), "{}", msg),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_duplicate_endpoint_query_rejected() {
    let yaml = r#"
endpoints:
  main:
    queries:
      - sql: "select id from t"
        columns: [ { name: id, type: BIGINT } ]
      - sql: " select id from t "
        columns: [ { name: id, type: BIGINT } ]
source: { type: sql, endpoint: main, query: "select id from t" }
"#;
    let parsed = parse_yaml_pipeline(yaml).expect("parse");
    assert!(matches!(validate_parsed(&parsed), Err(Error::Config(_))));
}

#[test]
fn test_zero_fetch_size_rejected() {
    let yaml = ORDERS.replace("fetch_size: 2", "fetch_size: 0");
    let parsed = parse_yaml_pipeline(&yaml).expect("parse");
    assert!(matches!(validate_pipeline(&parsed.pipeline), Err(Error::Config(_))));
}

#[test]
fn test_explain_nested_pipelines() {
    let parsed = parse_yaml_pipeline(ORDERS).expect("parse");
    let cfg = parsed.pipeline.config.clone().expect("config");
    let text = explain(&parsed.pipeline.body, &cfg);

    assert!(text.contains("Fetch size: 250 rows"), "{}", text);
    assert!(text.contains("source sql [shop] fetch_size=250 query: select id, customer from orders order by id"));
    assert!(text.contains("1. group_concat left join on [id] = [order_id]"));
    assert!(text.contains("    source sql [shop] fetch_size=2 query: select order_id, sku"));
    assert!(text.contains("2. dynamic_field left join on [id] = [order_id]"));
    assert!(text.contains("field definitions:"));
    assert!(text.contains("field values:"));
    assert!(text.contains("3. offset 1"));
    assert!(text.contains("4. limit 5"));
}
