//! Pipeline-level errors

use thiserror::Error;

/// Errors that prevent a run from starting or finishing normally
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The step graph failed validation; nothing was run
    #[error("Invalid pipeline configuration: {}", errors.join("; "))]
    Configuration { errors: Vec<String> },

    /// No step could run and none was blocked by a failure
    #[error("Scheduler deadlock: no runnable steps remain (pending: {})", pending.join(", "))]
    SchedulerDeadlock { pending: Vec<String> },

    /// The coordinating task ended abnormally
    #[error("Pipeline run aborted: {0}")]
    Internal(String),
}
