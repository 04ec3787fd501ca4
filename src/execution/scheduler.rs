//! Execution scheduler - dispatches ready steps in bounded batches

use crate::{
    core::{
        ExecutionContext, Pipeline, PipelineOptions, SkipReason, StepDefinition, StepError,
        StepResult, StepStatus,
    },
    execution::{
        error::PipelineError,
        events::{EventEmitter, EventType},
        executor::{ExecutorSettings, StepExecutor},
        result::{aggregate, PipelineResult},
    },
};
use indexmap::IndexMap;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives one run of a pipeline from start to its terminal event
pub(crate) struct Scheduler {
    steps: IndexMap<String, Arc<StepDefinition>>,
    order: Vec<String>,
    options: PipelineOptions,
    context: ExecutionContext,
    events: EventEmitter,
    executor: StepExecutor,
    results: HashMap<String, StepResult>,
    finished: HashSet<String>,
    running: HashSet<String>,
}

impl Scheduler {
    pub fn new(pipeline: &Pipeline, context: ExecutionContext, events: EventEmitter) -> Self {
        let settings = ExecutorSettings {
            default_timeout: pipeline.options.default_timeout,
            backoff_base: pipeline.options.backoff_base,
        };

        Self {
            steps: pipeline.shared_steps().clone(),
            order: pipeline.execution_order(),
            options: pipeline.options.clone(),
            executor: StepExecutor::new(settings, events.clone()),
            context,
            events,
            results: HashMap::new(),
            finished: HashSet::new(),
            running: HashSet::new(),
        }
    }

    /// Run every step to a terminal state and aggregate the outcome
    pub async fn run(mut self) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let total = self.steps.len();
        let run_id = self.context.run_id();

        info!(
            "Starting pipeline {} (run {}, {} steps)",
            self.context.pipeline_id(),
            run_id,
            total
        );
        self.events
            .emit(
                self.events
                    .event(EventType::PipelineStarted, "Pipeline started")
                    .progress(0)
                    .data(json!({ "runId": run_id, "totalSteps": total })),
            )
            .await;

        while self.finished.len() < total {
            let runnable = self.runnable();

            if runnable.is_empty() && self.running.is_empty() {
                if self.skip_blocked().await > 0 {
                    continue;
                }

                let pending = self.pending();
                error!(
                    "No steps ready to run and none running - pipeline stuck (pending: {:?})",
                    pending
                );
                self.finish(started, true).await;
                return Err(PipelineError::SchedulerDeadlock { pending });
            }

            let capacity = self
                .options
                .max_concurrency
                .saturating_sub(self.running.len());
            let batch: Vec<String> = runnable.into_iter().take(capacity).collect();
            let failed = self.dispatch(batch).await;

            if failed && self.options.stop_on_error {
                warn!("Stopping dispatch after step failure (stop_on_error)");
                while self.skip_blocked().await > 0 {}
                break;
            }
        }

        Ok(self.finish(started, false).await)
    }

    /// Steps whose dependencies are all terminal and none failure-blocked,
    /// in dependency-resolution order
    fn runnable(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !self.finished.contains(*id) && !self.running.contains(*id))
            .filter_map(|id| self.steps.get(id))
            .filter(|step| {
                step.dependencies_met(&self.finished)
                    && step.dependencies.iter().all(|dep| !self.is_blocking(dep))
            })
            .map(|step| step.id.clone())
            .collect()
    }

    fn is_blocking(&self, step_id: &str) -> bool {
        self.results
            .get(step_id)
            .is_some_and(|result| result.status.is_terminal() && result.blocks_dependents())
    }

    fn pending(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !self.finished.contains(*id))
            .cloned()
            .collect()
    }

    /// Mark steps that depend on a failure as skipped; returns how many were marked
    async fn skip_blocked(&mut self) -> usize {
        let blocked: Vec<(String, String)> = self
            .order
            .iter()
            .filter(|id| !self.finished.contains(*id) && !self.running.contains(*id))
            .filter_map(|id| self.steps.get(id))
            .filter_map(|step| {
                step.dependencies
                    .iter()
                    .find(|dep| self.is_blocking(dep))
                    .map(|dep| (step.id.clone(), dep.clone()))
            })
            .collect();

        for (step_id, dep) in &blocked {
            info!("Step {} skipped: dependency {} did not succeed", step_id, dep);
            let result = StepResult::skipped(
                SkipReason::BlockedByFailure,
                Some(format!("Dependency '{}' did not succeed", dep)),
                Duration::ZERO,
                0,
            );
            self.record(step_id, result).await;
        }

        blocked.len()
    }

    /// Run a batch concurrently; returns whether any step in it failed
    async fn dispatch(&mut self, batch: Vec<String>) -> bool {
        let mut handles: Vec<(String, JoinHandle<StepResult>)> = Vec::with_capacity(batch.len());

        for step_id in batch {
            let Some(step) = self.steps.get(&step_id).cloned() else {
                continue;
            };

            debug!("Dispatching step {}", step_id);
            self.events
                .emit(
                    self.events
                        .event(EventType::StepStarted, format!("Starting {}", step.name))
                        .step(&step)
                        .progress(self.progress()),
                )
                .await;

            self.running.insert(step_id.clone());
            self.results.insert(step_id.clone(), StepResult::running());

            let executor = self.executor.clone();
            let context = self.context.clone();
            let handle = tokio::spawn(async move { executor.execute(&step, &context).await });
            handles.push((step_id, handle));
        }

        let mut failed = false;
        for (step_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                // Attempts already run in their own tasks; this catches panics in hooks and conditions
                Err(e) => {
                    let message = StepError::Panicked(e.to_string()).to_string();
                    error!("Step {} task ended abnormally: {}", step_id, message);
                    self.context.log_error(&step_id, &message, 1);
                    StepResult::failed(message, Duration::ZERO, 0)
                }
            };

            failed |= self.record(&step_id, result).await == StepStatus::Failed;
        }

        failed
    }

    /// Store a terminal result, emit its event and return the recorded status
    async fn record(&mut self, step_id: &str, result: StepResult) -> StepStatus {
        self.running.remove(step_id);
        self.finished.insert(step_id.to_string());

        let result = if result.status.is_terminal() {
            result
        } else {
            let message = format!("Step ended in non-terminal state {:?}", result.status);
            error!("Step {}: {}", step_id, message);
            self.context.log_error(step_id, &message, result.retries.saturating_add(1));
            StepResult::failed(message, result.duration, result.retries)
        };

        let (kind, verb) = match result.status {
            StepStatus::Complete => {
                self.context.mark_completed(step_id);
                (EventType::StepComplete, "complete")
            }
            StepStatus::Skipped => {
                self.context.mark_skipped(step_id);
                (EventType::StepSkipped, "skipped")
            }
            StepStatus::Failed => {
                self.context.mark_failed(step_id);
                (EventType::StepFailed, "failed")
            }
            StepStatus::Pending | StepStatus::Running => return result.status,
        };

        if let Some(step) = self.steps.get(step_id) {
            let message = format!("{} {}", step.name, verb);

            let mut data = json!({ "retries": result.retries });
            if let Some(error) = &result.error {
                data["error"] = json!(error);
            }
            if let Some(reason) = result.skip_reason {
                data["reason"] = json!(reason.as_str());
            }
            if let Some(model) = result.output.as_ref().and_then(|o| o.model.as_ref()) {
                data["model"] = json!(model);
            }

            let event = self
                .events
                .event(kind, message)
                .step(step)
                .data(data)
                .progress(self.progress())
                .duration(result.duration);
            self.events.emit(event).await;
        }

        let status = result.status;
        self.results.insert(step_id.to_string(), result);
        status
    }

    fn progress(&self) -> u8 {
        let total = self.steps.len();
        if total == 0 {
            return 100;
        }
        (self.finished.len() * 100 / total) as u8
    }

    /// Emit the single terminal pipeline event and aggregate the result
    async fn finish(&self, started: Instant, deadlocked: bool) -> PipelineResult {
        let duration = started.elapsed();
        let result = aggregate(&self.steps, &self.results, &self.context, duration);
        let success = result.success && !deadlocked;

        let (kind, message) = if success {
            (EventType::PipelineComplete, "Pipeline complete")
        } else {
            (EventType::PipelineFailed, "Pipeline failed")
        };

        if success {
            info!(
                "Pipeline {} finished in {}ms",
                result.pipeline_id, result.duration_ms
            );
        } else {
            error!(
                "Pipeline {} failed after {}ms ({} failed step(s))",
                result.pipeline_id,
                result.duration_ms,
                result.with_status(StepStatus::Failed).len()
            );
        }

        self.events
            .emit(
                self.events
                    .event(kind, message)
                    .progress(100)
                    .duration(duration)
                    .data(json!({
                        "runId": result.run_id,
                        "success": success,
                        "completed": result.with_status(StepStatus::Complete).len(),
                        "failed": result.with_status(StepStatus::Failed).len(),
                        "skipped": result.with_status(StepStatus::Skipped).len(),
                        "pending": result.with_status(StepStatus::Pending).len(),
                    })),
            )
            .await;

        result
    }
}
