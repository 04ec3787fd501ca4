//! Simulated step work for YAML-described pipelines

use crate::core::{
    context::ExecutionContext,
    step::{StepError, StepHandler, StepOutput},
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// How a simulated step behaves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    /// How long each attempt takes
    #[serde(default)]
    pub duration_ms: u64,

    /// Number of leading attempts that fail
    #[serde(default)]
    pub fail_times: u32,

    /// Model reported on the output
    #[serde(default)]
    pub model: Option<String>,

    /// Output payload; echoes the input when absent
    #[serde(default)]
    pub output: Option<Value>,
}

/// Step handler that sleeps, fails a configured number of times, then succeeds
#[derive(Debug)]
pub struct SimulatedStep {
    step_id: String,
    simulation: Simulation,
    /// Attempts per run, so re-running the same pipeline starts from zero
    attempts: DashMap<Uuid, u32>,
}

impl SimulatedStep {
    pub fn new(step_id: String, simulation: Simulation) -> Self {
        Self {
            step_id,
            simulation,
            attempts: DashMap::new(),
        }
    }

    /// Number of times the step has been invoked during the given run
    pub fn attempts(&self, run_id: Uuid) -> u32 {
        self.attempts.get(&run_id).map(|count| *count).unwrap_or(0)
    }
}

#[async_trait]
impl StepHandler for SimulatedStep {
    async fn execute(
        &self,
        input: Value,
        context: ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let attempt = {
            let mut count = self.attempts.entry(context.run_id()).or_insert(0);
            *count += 1;
            *count
        };
        debug!("Simulating step {} (attempt {})", self.step_id, attempt);

        if context.is_cancelled() {
            return Err(StepError::msg("cancelled before start"));
        }

        if self.simulation.duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.simulation.duration_ms)).await;
        }

        if attempt <= self.simulation.fail_times {
            return Err(StepError::msg(format!(
                "simulated failure {} of {}",
                attempt, self.simulation.fail_times
            )));
        }

        let value = self
            .simulation
            .output
            .clone()
            .unwrap_or_else(|| json!({ "step": self.step_id, "input": input }));

        let mut output = StepOutput::new(value);
        output.model = self.simulation.model.clone();
        Ok(output)
    }
}
