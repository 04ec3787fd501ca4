//! Step executor - runs one step's attempts with timeout and backoff

use crate::{
    core::{ExecutionContext, OnError, SkipReason, StepDefinition, StepError, StepResult},
    execution::events::{EventEmitter, EventType},
};
use serde_json::json;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Engine-wide defaults applied to every step
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub default_timeout: Duration,
    pub backoff_base: Duration,
}

/// Executes a single step
#[derive(Debug, Clone)]
pub(crate) struct StepExecutor {
    settings: ExecutorSettings,
    events: EventEmitter,
}

impl StepExecutor {
    pub fn new(settings: ExecutorSettings, events: EventEmitter) -> Self {
        Self { settings, events }
    }

    /// Execute a step and return its terminal result
    pub async fn execute(&self, step: &StepDefinition, context: &ExecutionContext) -> StepResult {
        if let Some(condition) = &step.condition {
            if !condition(context) {
                info!("Step {} skipped: condition not met", step.id);
                return StepResult::skipped(SkipReason::Condition, None, Duration::ZERO, 0);
            }
        }

        let started = Instant::now();
        if let Some(on_start) = &step.hooks.on_start {
            on_start(context);
        }

        let input = step.input.resolve(context);
        let attempt_timeout = step.timeout.unwrap_or(self.settings.default_timeout);
        let max_attempts = step.max_attempts();
        let mut attempt = 0;

        let failure = loop {
            attempt += 1;
            debug!("Executing step {} (attempt {}/{})", step.id, attempt, max_attempts);

            // Each attempt gets its own task so a panic counts as a failed attempt
            let handler = step.handler.clone();
            let attempt_input = input.clone();
            let attempt_context = context.clone();
            let mut task =
                tokio::spawn(async move { handler.execute(attempt_input, attempt_context).await });

            let failure = match timeout(attempt_timeout, &mut task).await {
                Ok(Ok(Ok(output))) => {
                    context.set_output(&step.id, output.clone());
                    if let Some(on_complete) = &step.hooks.on_complete {
                        on_complete(&output, context);
                    }
                    info!("Step {} completed successfully", step.id);
                    return StepResult::complete(output, started.elapsed(), attempt - 1);
                }
                Ok(Ok(Err(e))) => e,
                Ok(Err(join_error)) => StepError::Panicked(join_error.to_string()),
                Err(_) => {
                    task.abort();
                    StepError::Timeout(attempt_timeout)
                }
            };

            if attempt >= max_attempts {
                break failure;
            }

            let delay = step.delay_after(attempt, self.settings.backoff_base);
            warn!(
                "Step {} attempt {}/{} failed: {}; retrying in {}ms",
                step.id,
                attempt,
                max_attempts,
                failure,
                delay.as_millis()
            );
            self.events
                .emit(
                    self.events
                        .event(
                            EventType::StepRetry,
                            format!("Retrying {} after failed attempt {}", step.name, attempt),
                        )
                        .step(step)
                        .data(json!({
                            "attempt": attempt,
                            "maxAttempts": max_attempts,
                            "delay": delay.as_millis() as u64,
                            "error": failure.to_string(),
                        })),
                )
                .await;
            sleep(delay).await;
        };

        let retries = attempt - 1;
        if let Some(on_fail) = &step.hooks.on_fail {
            on_fail(&failure, context);
        }

        let message = failure.to_string();
        match step.on_error {
            OnError::Skip | OnError::Continue => {
                warn!(
                    "Step {} failed after {} attempt(s), tolerated by {:?} policy: {}",
                    step.id, attempt, step.on_error, message
                );
                StepResult::skipped(
                    SkipReason::Tolerated,
                    Some(message),
                    started.elapsed(),
                    retries,
                )
            }
            OnError::Fail => {
                error!("Step {} failed after {} attempt(s): {}", step.id, attempt, message);
                context.log_error(&step.id, &message, attempt);
                StepResult::failed(message, started.elapsed(), retries)
            }
        }
    }
}
