//! Runtime: build a pipeline's stages, initialize them in order, and drive the result
//! into a sink.
//!
//! Behavior:
//! - Every stage is instantiated before any stream opens; definition errors (unknown
//!   endpoint, invalid join) fail the run up front.
//! - Stages initialize asynchronously, each receiving the typed stream of the one before.
//! - Nested pipelines requested by processors go through the same path and end in a
//!   `CaptureSink`.
//! - Processors are named `<parent>-<index>`; nested pipelines take the names their
//!   processors give them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;

use querypipe_core::config::EngineConfig;
use querypipe_core::defn::{Pipeline, ProcessorDefn, SourceDefn, SourcePipeline};
use querypipe_core::error::{Error, Result};
use querypipe_core::id::IdGen;
use querypipe_io::sql::{ConnectionPool, SqlSource};
use querypipe_io::static_source::StaticSource;
use querypipe_io::Source;
use querypipe_operators::{JoiningProcessor, Limit, Lookup, Offset, PipelineFactory, Processor};
use querypipe_stream::{ExecContext, Ready, TypedStream};

use crate::metrics::{self, RunSummary, RunTimer};
use crate::sink::{CaptureSink, Sink};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] Error),
    #[error("pipeline did not finish within {0:?}")]
    Timeout(Duration),
}

/// Effective engine config for a pipeline: its own `config` block when present
/// (unset fields take defaults), the environment otherwise.
pub fn resolve_config(pipeline: &Pipeline) -> EngineConfig {
    match &pipeline.config {
        Some(cfg) => cfg.clone(),
        None => EngineConfig::from_env(),
    }
}

pub struct PipelineExecutor {
    me: Weak<PipelineExecutor>,
    ctx: ExecContext,
    cfg: EngineConfig,
    endpoints: HashMap<String, Arc<dyn ConnectionPool>>,
    ids: IdGen,
}

impl PipelineExecutor {
    pub fn new(
        ctx: ExecContext,
        cfg: EngineConfig,
        endpoints: HashMap<String, Arc<dyn ConnectionPool>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx,
            cfg,
            endpoints,
            ids: IdGen::new(),
        })
    }

    pub fn create_source(&self, defn: &SourceDefn, name: &str) -> Result<Box<dyn Source>> {
        let name = defn.name().unwrap_or(name).to_string();
        match defn {
            SourceDefn::Sql(sql) => {
                let pool = self.endpoints.get(&sql.endpoint).cloned().ok_or_else(|| {
                    Error::Config(format!("{}: unknown endpoint '{}'", name, sql.endpoint))
                })?;
                Ok(Box::new(SqlSource::new(
                    name,
                    sql.clone(),
                    pool,
                    self.cfg.fetch_size,
                )))
            }
            SourceDefn::Static(s) => Ok(Box::new(StaticSource::new(name, s.clone()))),
        }
    }

    pub fn create_processors(
        &self,
        defns: &[ProcessorDefn],
        parent: &str,
    ) -> Result<Vec<Box<dyn Processor>>> {
        defns
            .iter()
            .enumerate()
            .map(|(i, defn)| {
                let name = format!("{}-{}", parent, i);
                let processor: Box<dyn Processor> = match defn {
                    ProcessorDefn::Merge(d) => Box::new(JoiningProcessor::merge(name, d)?),
                    ProcessorDefn::GroupConcat(d) => {
                        Box::new(JoiningProcessor::group_concat(name, d)?)
                    }
                    ProcessorDefn::DynamicField(d) => {
                        Box::new(JoiningProcessor::dynamic_field(name, d)?)
                    }
                    ProcessorDefn::Lookup(d) => Box::new(Lookup::new(name, d)?),
                    ProcessorDefn::Limit { limit } => Box::new(Limit::new(name, *limit)),
                    ProcessorDefn::Offset { offset } => Box::new(Offset::new(name, *offset)),
                };
                Ok(processor)
            })
            .collect()
    }

    /// Initialize the source, then each processor in order, yielding the last stream.
    pub fn initialize_pipeline(&self, defn: &SourcePipeline, name: &str) -> Ready<TypedStream> {
        let Some(factory) = self.me.upgrade() else {
            return Ready::failed(Error::Invariant("executor dropped during initialization".into()));
        };
        let factory: Arc<dyn PipelineFactory> = factory;
        let source = match self.create_source(&defn.source, name) {
            Ok(s) => s,
            Err(e) => return Ready::failed(e),
        };
        let processors = match self.create_processors(&defn.processors, name) {
            Ok(p) => p,
            Err(e) => return Ready::failed(e),
        };

        tracing::debug!(
            pipeline = %name,
            source = source.name(),
            processors = processors.len(),
            "initializing pipeline"
        );
        let started = Instant::now();
        let pipeline = name.to_string();
        let source_name = source.name().to_string();
        let mut ready = source.initialize(&self.ctx).map({
            let pipeline = pipeline.clone();
            move |ts| {
                metrics::emit_stage(&pipeline, &source_name, started);
                ts
            }
        });
        for processor in processors {
            let factory = Arc::clone(&factory);
            let pipeline = pipeline.clone();
            ready = ready.and_then(move |ts| {
                let stage = processor.name().to_string();
                processor.initialize(factory, ts).map(move |ts| {
                    metrics::emit_stage(&pipeline, &stage, started);
                    ts
                })
            });
        }
        ready
    }

    /// Validate, build and run `pipeline` into `sink`. Settles once the sink has
    /// consumed the whole stream, or with the first failure.
    pub fn run(&self, pipeline: &Pipeline, sink: Arc<dyn Sink>) -> Ready<RunSummary> {
        let timer = RunTimer::start(self.ids.pipeline());
        if let Err(e) = querypipe_planner::validate_pipeline(pipeline) {
            timer.fail(&e);
            return Ready::failed(e);
        }
        self.initialize_pipeline(&pipeline.body, "main")
            .and_then(move |ts| {
                tracing::debug!(sink = sink.name(), columns = ?ts.schema.names(), "pipeline output ready");
                sink.consume(ts)
            })
            .map(move |rows| timer.finish(rows))
            .on_failure(move |e| timer.fail(e))
    }

    /// Run on the calling thread, driving the context until the run settles.
    pub fn run_blocking(
        &self,
        pipeline: &Pipeline,
        sink: Arc<dyn Sink>,
        timeout: Duration,
    ) -> std::result::Result<RunSummary, ExecError> {
        let ready = self.run(pipeline, sink);
        let watched = ready.clone();
        self.ctx.run_until(|| watched.is_complete(), timeout);
        match ready.result() {
            Some(Ok(summary)) => Ok(summary),
            Some(Err(e)) => Err(ExecError::Pipeline(e)),
            None => Err(ExecError::Timeout(timeout)),
        }
    }
}

impl PipelineFactory for PipelineExecutor {
    fn context(&self) -> &ExecContext {
        &self.ctx
    }

    fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn initialize_sub_pipeline(&self, defn: &SourcePipeline, name: &str) -> Ready<TypedStream> {
        let sink = Arc::new(CaptureSink::new(name));
        let capture = Arc::clone(&sink);
        let missing = name.to_string();
        self.initialize_pipeline(defn, name)
            .and_then(move |ts| capture.consume(ts))
            .try_map(move |_| {
                sink.stream().ok_or_else(|| {
                    Error::Invariant(format!("{}: nested pipeline produced no stream", missing))
                })
            })
    }
}
