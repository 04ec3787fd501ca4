//! Main execution engine - starts a run and hands back its event stream

use crate::{
    core::{ExecutionContext, Pipeline},
    execution::{
        error::PipelineError,
        events::{EventEmitter, PipelineEvent},
        result::PipelineResult,
        scheduler::Scheduler,
    },
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Handle to an in-progress pipeline run
///
/// Events are buffered in a bounded channel; a consumer that stops reading
/// should drop the handle (or call [`PipelineRun::finish`]) so the run is not
/// held back by a full buffer.
#[derive(Debug)]
pub struct PipelineRun {
    run_id: Uuid,
    events: mpsc::Receiver<PipelineEvent>,
    handle: JoinHandle<Result<PipelineResult, PipelineError>>,
    cancelled: Arc<AtomicBool>,
}

impl PipelineRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next event, or `None` once the run has emitted its terminal event
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Ask running steps to stop; see [`ExecutionContext::is_cancelled`]
    pub fn cancel(&self) {
        info!("Cancellation requested for run {}", self.run_id);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Stop observing events and wait for the final result
    pub async fn finish(self) -> Result<PipelineResult, PipelineError> {
        drop(self.events);
        join(self.handle).await
    }

    /// Drain every event, then return them together with the final result
    pub async fn collect(mut self) -> (Vec<PipelineEvent>, Result<PipelineResult, PipelineError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, join(self.handle).await)
    }
}

async fn join(
    handle: JoinHandle<Result<PipelineResult, PipelineError>>,
) -> Result<PipelineResult, PipelineError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Internal(e.to_string())),
    }
}

/// Spawn the coordinating task for one run of `pipeline`
pub(crate) fn start(pipeline: &Pipeline, inputs: Value) -> PipelineRun {
    let (tx, rx) = mpsc::channel(pipeline.options.event_buffer.max(1));
    let cancelled = Arc::new(AtomicBool::new(false));
    let context = ExecutionContext::with_cancellation(pipeline.id.clone(), inputs, cancelled.clone());
    let run_id = context.run_id();

    debug!(
        "Spawning run {} of pipeline {} (max_concurrency {})",
        run_id, pipeline.id, pipeline.options.max_concurrency
    );
    let scheduler = Scheduler::new(pipeline, context, EventEmitter::new(tx, pipeline.id.clone()));
    let handle = tokio::spawn(scheduler.run());

    PipelineRun {
        run_id,
        events: rx,
        handle,
        cancelled,
    }
}
