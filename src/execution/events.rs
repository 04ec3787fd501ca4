//! Progress events emitted during a pipeline run
//!
//! The serialized field set of [`PipelineEvent`] is consumed by downstream
//! event-stream clients and must stay stable.

use crate::core::StepDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Kind of a pipeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    PipelineStarted,
    StepStarted,
    StepRetry,
    StepComplete,
    StepFailed,
    StepSkipped,
    PipelineComplete,
    PipelineFailed,
}

impl EventType {
    /// Whether this event ends a step
    pub fn is_step_terminal(&self) -> bool {
        matches!(
            self,
            EventType::StepComplete | EventType::StepFailed | EventType::StepSkipped
        )
    }

    /// Whether this event ends the run
    pub fn is_pipeline_terminal(&self) -> bool {
        matches!(self, EventType::PipelineComplete | EventType::PipelineFailed)
    }
}

/// A single progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    #[serde(rename = "type")]
    pub kind: EventType,

    pub pipeline_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Percentage of steps in a terminal state (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Elapsed milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl PipelineEvent {
    pub fn new(kind: EventType, pipeline_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            pipeline_id: pipeline_id.into(),
            step_id: None,
            step_name: None,
            message: message.into(),
            data: None,
            progress: None,
            timestamp: Utc::now(),
            duration: None,
        }
    }

    pub fn step(mut self, step: &StepDefinition) -> Self {
        self.step_id = Some(step.id.clone());
        self.step_name = Some(step.name.clone());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration.as_millis() as u64);
        self
    }
}

/// Sending half of a run's event stream
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    tx: mpsc::Sender<PipelineEvent>,
    pipeline_id: String,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<PipelineEvent>, pipeline_id: String) -> Self {
        Self { tx, pipeline_id }
    }

    /// Start building an event for this pipeline
    pub fn event(&self, kind: EventType, message: impl Into<String>) -> PipelineEvent {
        PipelineEvent::new(kind, self.pipeline_id.clone(), message)
    }

    /// Deliver an event, waiting for channel capacity
    ///
    /// A dropped receiver is not an error: the run continues unobserved.
    pub async fn emit(&self, event: PipelineEvent) {
        debug!(
            "event {:?} step={:?} progress={:?}",
            event.kind, event.step_id, event.progress
        );
        let _ = self.tx.send(event).await;
    }
}
