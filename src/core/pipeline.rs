//! Pipeline domain model - step registry, validation and dependency ordering

use crate::core::{
    config::PipelineOptions,
    step::StepDefinition,
};
use crate::execution::{engine, PipelineError, PipelineResult, PipelineRun};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of [`Pipeline::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// A set of steps and the options they run under
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline identifier, reported on every event
    pub id: String,

    /// Steps in registration order
    steps: IndexMap<String, Arc<StepDefinition>>,

    pub options: PipelineOptions,
}

impl Pipeline {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_options(id, PipelineOptions::default())
    }

    pub fn with_options(id: impl Into<String>, options: PipelineOptions) -> Self {
        Self {
            id: id.into(),
            steps: IndexMap::new(),
            options,
        }
    }

    /// Register a step, replacing any earlier step with the same id
    pub fn add_step(&mut self, step: StepDefinition) -> &mut Self {
        self.steps.insert(step.id.clone(), Arc::new(step));
        self
    }

    /// Register several steps
    pub fn add_steps<I>(&mut self, steps: I) -> &mut Self
    where
        I: IntoIterator<Item = StepDefinition>,
    {
        for step in steps {
            self.add_step(step);
        }
        self
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id).map(Arc::as_ref)
    }

    /// Steps in registration order
    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn shared_steps(&self) -> &IndexMap<String, Arc<StepDefinition>> {
        &self.steps
    }

    /// Check references and cycles in the dependency graph
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        if self.options.max_concurrency == 0 {
            errors.push("max_concurrency must be at least 1".to_string());
        }

        for step in self.steps.values() {
            for dep in &step.dependencies {
                if !self.steps.contains_key(dep) {
                    errors.push(format!(
                        "Step '{}' depends on non-existent step '{}'",
                        step.id, dep
                    ));
                }
            }
        }

        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        for id in self.steps.keys() {
            if !visited.contains(id.as_str()) {
                self.find_cycles(id, &mut visited, &mut stack, &mut errors);
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn find_cycles<'a>(
        &'a self,
        step_id: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        errors: &mut Vec<String>,
    ) {
        visited.insert(step_id);
        stack.push(step_id);

        if let Some(step) = self.steps.get(step_id) {
            for dep in &step.dependencies {
                if let Some(pos) = stack.iter().position(|id| *id == dep) {
                    let mut members: Vec<&str> = stack[pos..].to_vec();
                    members.push(dep.as_str());
                    errors.push(format!(
                        "Cycle detected in dependency graph: {}",
                        members.join(" -> ")
                    ));
                } else if !visited.contains(dep.as_str()) && self.steps.contains_key(dep) {
                    self.find_cycles(dep, visited, stack, errors);
                }
            }
        }

        stack.pop();
    }

    /// Linear order in which every step follows its dependencies
    ///
    /// Post-order DFS over registration order. Unknown dependencies are ignored
    /// and a node already on the stack is not re-entered, so the traversal
    /// terminates on a cyclic graph; it does not report the cycle.
    pub fn execution_order(&self) -> Vec<String> {
        let mut result = Vec::with_capacity(self.steps.len());
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();

        for step_id in self.steps.keys() {
            self.visit(step_id, &mut visited, &mut on_stack, &mut result);
        }

        result
    }

    fn visit<'a>(
        &'a self,
        step_id: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(step_id) || on_stack.contains(step_id) {
            return;
        }
        let Some(step) = self.steps.get(step_id) else {
            return;
        };

        on_stack.insert(step_id);
        for dep in &step.dependencies {
            self.visit(dep, visited, on_stack, result);
        }
        on_stack.remove(step_id);

        visited.insert(step_id);
        result.push(step_id.to_string());
    }

    /// Start a run and stream its events
    ///
    /// Fails with [`PipelineError::Configuration`] before anything runs when
    /// validation reports errors. Must be called from within a tokio runtime.
    pub fn execute(&self, inputs: Value) -> Result<PipelineRun, PipelineError> {
        let report = self.validate();
        if !report.valid {
            return Err(PipelineError::Configuration {
                errors: report.errors,
            });
        }
        Ok(engine::start(self, inputs))
    }

    /// Run to completion and return only the final result
    pub async fn run(&self, inputs: Value) -> Result<PipelineResult, PipelineError> {
        self.execute(inputs)?.finish().await
    }
}
