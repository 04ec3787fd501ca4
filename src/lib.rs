//! pipeline-engine - run DAGs of async steps with bounded concurrency,
//! retries and a live progress-event stream

pub mod agent;
pub mod cli;
pub mod core;
pub mod execution;

// Re-export commonly used types
pub use agent::{ModelClient, ModelError, ModelRequest, ModelResponse, PromptStep};
pub use core::{
    ExecutionContext, OnError, Pipeline, PipelineConfig, PipelineOptions, StepDefinition,
    StepError, StepHandler, StepOutput, StepStatus, ValidationReport,
};
pub use execution::{EventType, PipelineError, PipelineEvent, PipelineResult, PipelineRun, StepReport};
