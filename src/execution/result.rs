//! Final result of a pipeline run

use crate::core::{
    ErrorLogEntry, ExecutionContext, StepDefinition, StepOutput, StepResult, StepStatus,
};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-step entry of a [`PipelineResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub id: String,
    pub name: String,
    pub status: StepStatus,

    /// Milliseconds spent on the step
    pub duration: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Retries consumed; absent for steps that never ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Aggregated outcome of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub pipeline_id: String,
    pub run_id: Uuid,

    /// True when no step failed
    pub success: bool,

    /// Outputs of completed steps, keyed by step id
    pub outputs: BTreeMap<String, StepOutput>,

    /// One entry per registered step, in registration order
    pub steps: Vec<StepReport>,

    #[serde(rename = "duration")]
    pub duration_ms: u64,

    /// Distinct models reported by completed steps
    pub models: Vec<String>,

    pub errors: Vec<ErrorLogEntry>,
}

impl PipelineResult {
    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&Value> {
        self.outputs.get(id).map(|o| &o.value)
    }

    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.step(id).map(|s| s.status)
    }

    /// Ids of steps with the given status, in registration order
    pub fn with_status(&self, status: StepStatus) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.id.as_str())
            .collect()
    }
}

/// Build the final result from the recorded step outcomes
pub(crate) fn aggregate(
    steps: &IndexMap<String, Arc<StepDefinition>>,
    results: &HashMap<String, StepResult>,
    context: &ExecutionContext,
    duration: Duration,
) -> PipelineResult {
    let mut outputs = BTreeMap::new();
    let mut models: Vec<String> = Vec::new();
    let mut reports = Vec::with_capacity(steps.len());

    for (id, step) in steps {
        let Some(result) = results.get(id) else {
            reports.push(StepReport {
                id: id.clone(),
                name: step.name.clone(),
                status: StepStatus::Pending,
                duration: 0,
                output: None,
                error: None,
                retries: None,
            });
            continue;
        };

        if let Some(output) = &result.output {
            if let Some(model) = &output.model {
                if !models.contains(model) {
                    models.push(model.clone());
                }
            }
            outputs.insert(id.clone(), output.clone());
        }

        reports.push(StepReport {
            id: id.clone(),
            name: step.name.clone(),
            status: result.status,
            duration: result.duration.as_millis() as u64,
            output: result.output.as_ref().map(|o| o.value.clone()),
            error: result.error.clone(),
            retries: Some(result.retries),
        });
    }

    let metadata = context.metadata();
    PipelineResult {
        pipeline_id: metadata.pipeline_id,
        run_id: metadata.run_id,
        success: !reports.iter().any(|r| r.status == StepStatus::Failed),
        outputs,
        steps: reports,
        duration_ms: duration.as_millis() as u64,
        models,
        errors: metadata.errors,
    }
}
