//! Pipeline configuration from YAML

use crate::core::{
    simulate::{SimulatedStep, Simulation},
    step::{OnError, StepDefinition},
    Pipeline,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Engine settings for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Maximum number of steps in flight at once
    pub max_concurrency: usize,

    /// Stop dispatching new batches after a batch with a failed step
    pub stop_on_error: bool,

    /// Per-attempt timeout for steps that do not set one
    pub default_timeout: Duration,

    /// First delay of the exponential retry backoff
    pub backoff_base: Duration,

    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            stop_on_error: false,
            default_timeout: Duration::from_millis(60_000),
            backoff_base: Duration::from_millis(1_000),
            event_buffer: 64,
        }
    }
}

impl PipelineOptions {
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, used as the pipeline id
    pub name: String,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub stop_on_error: bool,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Pipeline steps
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// List of step IDs this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Fixed delay between attempts (exponential backoff when absent)
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    #[serde(default)]
    pub on_error: OnError,

    /// Static input handed to the work function
    #[serde(default)]
    pub input: Option<Value>,

    /// Simulated work used by the command-line runner
    #[serde(default)]
    pub simulate: Simulation,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_event_buffer() -> usize {
    64
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).context("Invalid pipeline YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate what the step graph check cannot see
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be at least 1");
        }

        let mut seen_ids = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
        }

        Ok(())
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            max_concurrency: self.max_concurrency,
            stop_on_error: self.stop_on_error,
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            event_buffer: self.event_buffer,
        }
    }

    /// Convert config to a Pipeline whose steps run their simulations
    pub fn to_pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::with_options(self.name.clone(), self.options());
        pipeline.add_steps(self.steps.iter().map(StepConfig::to_step));
        pipeline
    }
}

impl StepConfig {
    pub fn to_step(&self) -> StepDefinition {
        let handler = Arc::new(SimulatedStep::new(self.id.clone(), self.simulate.clone()));
        let mut step = StepDefinition::with_handler(self.id.clone(), handler)
            .depends_on(self.depends_on.iter().cloned())
            .retries(self.retries)
            .on_error(self.on_error);

        if let Some(name) = &self.name {
            step = step.name(name.clone());
        }
        if let Some(ms) = self.timeout_ms {
            step = step.timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry_delay_ms {
            step = step.retry_delay(Duration::from_millis(ms));
        }
        if let Some(input) = &self.input {
            step = step.input(input.clone());
        }
        step
    }
}
