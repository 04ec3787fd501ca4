//! Model-backed steps
//!
//! [`ModelClient`] is the seam to whatever routes prompts to inference
//! backends; [`PromptStep`] turns a prompt template into a pipeline step.

pub mod response;

use crate::core::{ExecutionContext, StepDefinition, StepError, StepHandler, StepOutput};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use response::{ModelError, ModelRequest, ModelResponse, TokenUsage};

/// Trait for model execution - allows for different implementations
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Step handler that renders a prompt and sends it to a model
#[derive(Clone)]
pub struct PromptStep {
    template: String,
    model: Option<String>,
    client: Arc<dyn ModelClient>,
}

impl PromptStep {
    pub fn new(template: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        Self {
            template: template.into(),
            model: None,
            client,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Wrap this handler in a step definition
    pub fn into_step(self, id: impl Into<String>) -> StepDefinition {
        StepDefinition::with_handler(id, Arc::new(self))
    }

    /// Replace `{{ name }}` placeholders with their values
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut prompt = self.template.clone();
        for (key, value) in variables {
            let placeholder = format!("{{{{ {} }}}}", key);
            prompt = prompt.replace(&placeholder, value);
        }
        prompt
    }
}

/// Variables visible to a prompt: top-level input fields and prior step outputs
fn rendering_variables(input: &Value, context: &ExecutionContext) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    match input {
        Value::Object(fields) => {
            for (key, value) in fields {
                vars.insert(key.clone(), render_value(value));
            }
        }
        Value::Null => {}
        other => {
            vars.insert("input".to_string(), render_value(other));
        }
    }

    for (step_id, output) in context.outputs() {
        vars.insert(format!("steps.{}.output", step_id), render_value(&output.value));
    }

    vars
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl StepHandler for PromptStep {
    async fn execute(
        &self,
        input: Value,
        context: ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let prompt = self.render(&rendering_variables(&input, &context));
        debug!("Sending {} byte prompt", prompt.len());

        let response = self
            .client
            .complete(ModelRequest {
                prompt,
                model: self.model.clone(),
            })
            .await?;

        Ok(StepOutput::new(json!(response.content)).with_model(response.model))
    }
}
