//! Human-readable pipeline tree (EXPLAIN).

use std::fmt::Write;

use querypipe_core::config::EngineConfig;
use querypipe_core::defn::{ProcessorDefn, SourceDefn, SourcePipeline};

/// Render `pipeline` as an indented tree, with join keys and the watermarks each join
/// will run with.
pub fn explain(pipeline: &SourcePipeline, cfg: &EngineConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pipeline Plan");
    let _ = writeln!(out, "=============");
    let _ = writeln!(out);
    let _ = writeln!(out, "Fetch size: {} rows", cfg.fetch_size);
    let _ = writeln!(
        out,
        "Key comparison: {}",
        if cfg.strict_key_comparison { "strict" } else { "lenient" }
    );
    let _ = writeln!(out);
    render(&mut out, pipeline, cfg, 0);
    out
}

fn render(out: &mut String, p: &SourcePipeline, cfg: &EngineConfig, depth: usize) {
    let pad = "  ".repeat(depth);
    match &p.source {
        SourceDefn::Sql(sql) => {
            let fetch = sql.fetch_size.unwrap_or(cfg.fetch_size);
            let _ = writeln!(
                out,
                "{}source sql [{}] fetch_size={} query: {}",
                pad, sql.endpoint, fetch, sql.query
            );
        }
        SourceDefn::Static(st) => {
            let _ = writeln!(
                out,
                "{}source static ({} columns, {} rows)",
                pad,
                st.columns.len(),
                st.rows.len()
            );
        }
    }
    for (i, proc) in p.processors.iter().enumerate() {
        let _ = write!(out, "{}{}. {}", pad, i + 1, proc.kind());
        match proc {
            ProcessorDefn::Merge(m) => {
                join_line(out, &m.keys.parent_id_columns, &m.keys.child_id_columns, m.keys.inner_join, cfg);
                render(out, &m.input, cfg, depth + 2);
            }
            ProcessorDefn::GroupConcat(gc) => {
                join_line(out, &gc.keys.parent_id_columns, &gc.keys.child_id_columns, gc.keys.inner_join, cfg);
                render(out, &gc.input, cfg, depth + 2);
            }
            ProcessorDefn::DynamicField(df) => {
                join_line(out, &df.parent_id_columns, &df.values_parent_id_columns, df.inner_join, cfg);
                let _ = writeln!(out, "{}    field definitions:", pad);
                render(out, &df.field_defns, cfg, depth + 3);
                let _ = writeln!(out, "{}    field values:", pad);
                render(out, &df.field_values, cfg, depth + 3);
            }
            ProcessorDefn::Lookup(l) => {
                let fields: Vec<String> = l
                    .lookup_fields
                    .iter()
                    .map(|f| format!("{} -> {}", f.key_field, f.value_field))
                    .collect();
                let _ = writeln!(
                    out,
                    " [{}] via map ({} -> {})",
                    fields.join(", "),
                    l.lookup_key_field,
                    l.lookup_value_field
                );
                render(out, &l.map, cfg, depth + 2);
            }
            ProcessorDefn::Limit { limit } => {
                let _ = writeln!(out, " {}", limit);
            }
            ProcessorDefn::Offset { offset } => {
                let _ = writeln!(out, " {}", offset);
            }
        }
    }
}

fn join_line(out: &mut String, parent: &[String], child: &[String], inner: bool, cfg: &EngineConfig) {
    let _ = writeln!(
        out,
        " {} join on [{}] = [{}] watermarks primary {}/{} secondary {}/{}",
        if inner { "inner" } else { "left" },
        parent.join(", "),
        child.join(", "),
        cfg.primary_high_watermark,
        cfg.primary_low_watermark,
        cfg.secondary_high_watermark,
        cfg.secondary_low_watermark
    );
}
