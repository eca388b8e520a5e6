//! Run metrics as structured `tracing` events.
//!
//! Nothing is aggregated here; the subscriber installed by the binary decides where the
//! events go.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use querypipe_core::error::Error;
use querypipe_core::id::PipelineId;

/// Outcome of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub pipeline: PipelineId,
    pub rows: u64,
    pub elapsed_ms: u64,
}

/// Wall-clock timer for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunTimer {
    pipeline: PipelineId,
    started: Instant,
}

impl RunTimer {
    pub fn start(pipeline: PipelineId) -> Self {
        tracing::info!(pipeline = %pipeline, "pipeline starting");
        Self {
            pipeline,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Close the run successfully and emit its summary.
    pub fn finish(&self, rows: u64) -> RunSummary {
        let summary = RunSummary {
            pipeline: self.pipeline,
            rows,
            elapsed_ms: self.elapsed_ms(),
        };
        emit_summary(&summary);
        summary
    }

    pub fn fail(&self, err: &Error) {
        tracing::error!(
            pipeline = %self.pipeline,
            elapsed_ms = self.elapsed_ms(),
            error = %err,
            "pipeline failed"
        );
    }
}

pub fn emit_summary(summary: &RunSummary) {
    tracing::info!(
        pipeline = %summary.pipeline,
        rows = summary.rows,
        elapsed_ms = summary.elapsed_ms,
        "pipeline finished"
    );
}

pub fn emit_stage(pipeline: &str, stage: &str, started: Instant) {
    tracing::debug!(
        pipeline,
        stage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage initialized"
    );
}
