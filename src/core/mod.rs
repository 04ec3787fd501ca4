//! Core domain models for Pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, their run-scoped context and configuration.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod simulate;
pub mod state;
pub mod step;

pub use config::{PipelineConfig, PipelineOptions};
pub use context::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
