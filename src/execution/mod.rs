//! Pipeline execution engine

pub mod engine;
pub mod error;
pub mod events;
mod executor;
pub mod result;
mod scheduler;

pub use engine::PipelineRun;
pub use error::PipelineError;
pub use events::{EventType, PipelineEvent};
pub use result::{PipelineResult, StepReport};
