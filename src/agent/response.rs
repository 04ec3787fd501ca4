//! Model request and response types

use crate::core::StepError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for model calls
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModelError> for StepError {
    fn from(err: ModelError) -> Self {
        StepError::Execution(err.to_string())
    }
}

/// A rendered prompt bound for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,

    /// Preferred model; the client routes when unset
    pub model: Option<String>,
}

/// Response from a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The response content
    pub content: String,

    /// Model that actually answered
    pub model: String,

    /// Token usage information (if available)
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: None,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
