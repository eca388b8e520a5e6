//! Processor trait + the factory interface processors use to build sub-pipelines.
//!
//! The executor initializes each processor in pipeline order, handing it the typed
//! stream produced by the stage before it. Initialization is asynchronous: a processor
//! that needs other pipelines (a join's secondary input) resolves only once those are
//! ready.

use std::sync::Arc;

use querypipe_core::config::EngineConfig;
use querypipe_core::defn::SourcePipeline;
use querypipe_stream::{ExecContext, Ready, TypedStream};

/// A pipeline stage transforming one typed stream into another.
///
/// Invariants:
/// - The returned stream's schema is final once the signal resolves; columns a
///   processor adds are declared before then.
/// - A processor that fails to initialize must not leave sub-pipelines running.
pub trait Processor: Send {
    /// Human-readable stage name, used in logs and sub-pipeline names.
    fn name(&self) -> &str;

    fn initialize(
        self: Box<Self>,
        factory: Arc<dyn PipelineFactory>,
        input: TypedStream,
    ) -> Ready<TypedStream>;
}

/// What a processor may ask of the engine while it initializes.
pub trait PipelineFactory: Send + Sync {
    fn context(&self) -> &ExecContext;

    fn config(&self) -> &EngineConfig;

    /// Build and initialize a nested pipeline, yielding its output stream.
    fn initialize_sub_pipeline(&self, defn: &SourcePipeline, name: &str) -> Ready<TypedStream>;
}
