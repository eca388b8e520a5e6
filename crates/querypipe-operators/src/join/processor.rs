//! The joining processor: wires a join variant to the merge engine.
//!
//! Initialization order:
//! 1. for the pivot variant, drain the field-definition pipeline and build the fields;
//! 2. initialize the secondary pipeline and wait for its typed stream;
//! 3. declare the variant's columns on the primary schema;
//! 4. hand back a merged stream over the primary schema.

use std::sync::Arc;

use querypipe_core::defn::{DynamicFieldDefn, GroupConcatDefn, MergeDefn, SourcePipeline};
use querypipe_core::error::{Error, Result};
use querypipe_core::row::Row;
use querypipe_core::schema::Schema;
use querypipe_stream::protocol::detach;
use querypipe_stream::{capture, ReadStream, Ready, TypedStream};

use super::compare::KeyComparator;
use super::descriptor::{JoinDescriptor, JoinVariant, PivotSpec};
use super::dynamic_field::DynamicFields;
use super::group_concat::GroupConcat;
use super::merge::{CombineFn, CompareFn, MergeStream, Watermarks};
use super::merge_all::MergeAll;
use super::RowCombiner;
use crate::traits::{PipelineFactory, Processor};

pub struct JoiningProcessor {
    name: String,
    descriptor: JoinDescriptor,
    secondary: SourcePipeline,
    field_defns: Option<SourcePipeline>,
}

impl JoiningProcessor {
    /// `field_defns` is required by, and only used by, the pivot variant.
    pub fn new(
        name: impl Into<String>,
        descriptor: JoinDescriptor,
        secondary: SourcePipeline,
        field_defns: Option<SourcePipeline>,
    ) -> Result<Self> {
        let name = name.into();
        if matches!(descriptor.variant, JoinVariant::Pivot(_)) && field_defns.is_none() {
            return Err(Error::Config(format!(
                "{}: dynamic field join requires a field definition pipeline",
                name
            )));
        }
        Ok(Self {
            name,
            descriptor,
            secondary,
            field_defns,
        })
    }

    pub fn merge(name: impl Into<String>, defn: &MergeDefn) -> Result<Self> {
        Self::new(name, JoinDescriptor::for_merge(defn)?, defn.input.clone(), None)
    }

    pub fn group_concat(name: impl Into<String>, defn: &GroupConcatDefn) -> Result<Self> {
        Self::new(
            name,
            JoinDescriptor::for_group_concat(defn)?,
            defn.input.clone(),
            None,
        )
    }

    pub fn dynamic_field(name: impl Into<String>, defn: &DynamicFieldDefn) -> Result<Self> {
        Self::new(
            name,
            JoinDescriptor::for_dynamic_field(defn)?,
            defn.field_values.clone(),
            Some(defn.field_defns.clone()),
        )
    }

    pub fn descriptor(&self) -> &JoinDescriptor {
        &self.descriptor
    }
}

impl Processor for JoiningProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        self: Box<Self>,
        factory: Arc<dyn PipelineFactory>,
        input: TypedStream,
    ) -> Ready<TypedStream> {
        let JoiningProcessor {
            name,
            descriptor,
            secondary,
            field_defns,
        } = *self;
        tracing::debug!(
            processor = %name,
            variant = descriptor.variant.name(),
            parent_keys = ?descriptor.primary_keys,
            child_keys = ?descriptor.secondary_keys,
            inner_join = descriptor.inner_join,
            "initializing joining processor"
        );

        let fields: Ready<Option<DynamicFields>> = match (&descriptor.variant, &field_defns) {
            (JoinVariant::Pivot(spec), Some(defns)) => {
                load_fields(factory.as_ref(), defns, &format!("{}.fieldDefns", name), spec)
                    .map(Some)
            }
            _ => Ready::done(None),
        };

        let primary = input.clone();
        let child_name = format!("{}.input", name);
        let join_name = name.clone();
        fields
            .and_then(move |fields| {
                factory
                    .initialize_sub_pipeline(&secondary, &child_name)
                    .try_map(move |child| {
                        build_join(
                            &join_name,
                            factory.as_ref(),
                            descriptor,
                            fields,
                            primary,
                            child,
                        )
                    })
            })
            .on_failure(move |e| {
                tracing::warn!(processor = %name, error = %e, "joining processor failed to initialize");
                detach(input.stream.as_ref());
            })
    }
}

fn load_fields(
    factory: &dyn PipelineFactory,
    defns: &SourcePipeline,
    name: &str,
    spec: &PivotSpec,
) -> Ready<DynamicFields> {
    let spec = spec.clone();
    factory
        .initialize_sub_pipeline(defns, name)
        .and_then(|ts| capture(ts.stream))
        .map(move |rows| DynamicFields::from_rows(&rows, &spec))
}

fn build_join(
    name: &str,
    factory: &dyn PipelineFactory,
    descriptor: JoinDescriptor,
    fields: Option<DynamicFields>,
    primary: TypedStream,
    child: TypedStream,
) -> Result<TypedStream> {
    let combiner = make_combiner(&descriptor, fields, &child.schema).map_err(|e| {
        detach(child.stream.as_ref());
        e
    })?;
    combiner.register_columns(&primary.schema).map_err(|e| {
        detach(child.stream.as_ref());
        match e {
            Error::Schema(msg) => Error::Schema(format!("{}: {}", name, msg)),
            other => other,
        }
    })?;
    tracing::debug!(processor = %name, columns = ?primary.schema.names(), "joined schema");

    let cfg = factory.config();
    let comparator = KeyComparator::new(
        descriptor.primary_keys,
        descriptor.secondary_keys,
        cfg.strict_key_comparison,
    );
    let compare: CompareFn<Row, Row> =
        Arc::new(move |p: &Row, s: &Row| comparator.compare(p, s));
    let combine: CombineFn<Row, Row, Row> =
        Arc::new(move |p: Row, ms: Vec<Row>| combiner.combine(p, ms));
    let merged: Arc<dyn ReadStream<Row>> = Arc::new(MergeStream::new(
        factory.context(),
        primary.stream,
        child.stream,
        compare,
        combine,
        descriptor.inner_join,
        Watermarks::from_config(cfg),
    ));
    Ok(TypedStream::new(merged, primary.schema))
}

fn make_combiner(
    descriptor: &JoinDescriptor,
    fields: Option<DynamicFields>,
    child_schema: &Schema,
) -> Result<Arc<dyn RowCombiner>> {
    let combiner: Arc<dyn RowCombiner> = match &descriptor.variant {
        JoinVariant::MergeAll { include, exclude } => Arc::new(MergeAll::new(
            descriptor.secondary_keys.clone(),
            include.clone(),
            exclude.clone(),
            child_schema.clone(),
        )),
        JoinVariant::Concatenate {
            delimiter,
            child_value_column,
            parent_value_column,
        } => Arc::new(GroupConcat::new(
            descriptor.secondary_keys.clone(),
            delimiter.clone(),
            child_value_column.clone(),
            parent_value_column.clone(),
            child_schema.clone(),
        )),
        JoinVariant::Pivot(_) => {
            let fields = fields.ok_or_else(|| {
                Error::Invariant("dynamic field join initialized without field definitions".into())
            })?;
            Arc::new(fields)
        }
    };
    Ok(combiner)
}
