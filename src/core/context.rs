//! Execution context - run-scoped state shared by every step

use crate::core::step::StepOutput;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// A failure recorded in the run's error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub step: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
}

/// Bookkeeping about the run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub pipeline_id: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<ErrorLogEntry>,
}

#[derive(Debug)]
struct ContextInner {
    inputs: Value,
    outputs: DashMap<String, StepOutput>,
    state: DashMap<String, Value>,
    metadata: Mutex<RunMetadata>,
    cancelled: Arc<AtomicBool>,
}

/// Execution context for a pipeline run
///
/// Cloning is cheap; every clone refers to the same run. The shared `state`
/// map only guarantees per-key atomicity: steps that must coordinate writes
/// should depend on each other.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Create a fresh context for one run
    pub fn new(pipeline_id: impl Into<String>, inputs: Value) -> Self {
        Self::with_cancellation(pipeline_id, inputs, Arc::new(AtomicBool::new(false)))
    }

    /// Create a context that observes an external cancellation flag
    pub fn with_cancellation(
        pipeline_id: impl Into<String>,
        inputs: Value,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let metadata = RunMetadata {
            pipeline_id: pipeline_id.into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        };

        Self {
            inner: Arc::new(ContextInner {
                inputs,
                outputs: DashMap::new(),
                state: DashMap::new(),
                metadata: Mutex::new(metadata),
                cancelled,
            }),
        }
    }

    /// Caller inputs for this run
    pub fn inputs(&self) -> &Value {
        &self.inner.inputs
    }

    /// Output of a completed step
    pub fn output(&self, step_id: &str) -> Option<StepOutput> {
        self.inner.outputs.get(step_id).map(|entry| entry.value().clone())
    }

    /// Payload of a completed step's output
    pub fn output_value(&self, step_id: &str) -> Option<Value> {
        self.inner.outputs.get(step_id).map(|entry| entry.value.clone())
    }

    pub(crate) fn set_output(&self, step_id: &str, output: StepOutput) {
        self.inner.outputs.insert(step_id.to_string(), output);
    }

    /// Snapshot of all outputs recorded so far
    pub fn outputs(&self) -> HashMap<String, StepOutput> {
        self.inner
            .outputs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Read a value from the shared scratch state
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.inner.state.get(key).map(|entry| entry.value().clone())
    }

    /// Write a value into the shared scratch state
    pub fn set_state(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.state.insert(key.into(), value)
    }

    /// Update a scratch value in place, atomically for that key
    pub fn update_state<F>(&self, key: impl Into<String>, f: F)
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = key.into();
        let mut entry = self.inner.state.entry(key).or_insert(Value::Null);
        let current = (!entry.is_null()).then(|| entry.value().clone());
        *entry = f(current.as_ref());
    }

    /// Whether cancellation was requested; work functions may poll this
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation of cooperative steps
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the run metadata
    pub fn metadata(&self) -> RunMetadata {
        self.lock_metadata().clone()
    }

    pub fn pipeline_id(&self) -> String {
        self.lock_metadata().pipeline_id.clone()
    }

    pub fn run_id(&self) -> Uuid {
        self.lock_metadata().run_id
    }

    pub(crate) fn mark_completed(&self, step_id: &str) {
        self.lock_metadata().completed.push(step_id.to_string());
    }

    pub(crate) fn mark_failed(&self, step_id: &str) {
        self.lock_metadata().failed.push(step_id.to_string());
    }

    pub(crate) fn mark_skipped(&self, step_id: &str) {
        self.lock_metadata().skipped.push(step_id.to_string());
    }

    pub(crate) fn log_error(&self, step_id: &str, error: &str, attempt: u32) {
        self.lock_metadata().errors.push(ErrorLogEntry {
            step: step_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
            attempt,
        });
    }

    // A panicking hook must not take the rest of the run down with it.
    fn lock_metadata(&self) -> MutexGuard<'_, RunMetadata> {
        self.inner
            .metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
