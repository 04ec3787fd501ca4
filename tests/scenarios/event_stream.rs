//! Test: event ordering, progress and the wire format

use crate::helpers::*;
use pipeline_engine::core::{StepDefinition, StepError, StepOutput};
use pipeline_engine::execution::{EventType, PipelineError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// started first, one terminal pipeline event last, progress never decreases
#[tokio::test(start_paused = true)]
async fn test_event_sequence_shape() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = pipeline_of(vec![
        ok_step("a", &[]),
        flaky_step("b", 1, calls).retries(1).depends_on(["a"]),
        failing_step("c", &[]),
        ok_step("d", &["c"]),
    ]);

    let (events, _result) = run_collect(&pipeline, Value::Null).await;

    let first = &events[0];
    assert_eq!(first.kind, EventType::PipelineStarted);
    assert_eq!(first.progress, Some(0));
    assert_eq!(first.data.as_ref().unwrap()["totalSteps"], 4);

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventType::PipelineFailed);
    assert_eq!(last.progress, Some(100));
    assert!(last.duration.is_some());
    assert_eq!(
        events.iter().filter(|e| e.kind.is_pipeline_terminal()).count(),
        1
    );

    let progress: Vec<u8> = events.iter().filter_map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);

    assert_eq!(step_ids(&events, EventType::StepRetry), vec!["b"]);
    assert!(events.iter().all(|e| e.pipeline_id == "scenario"));
}

/// Each dispatched step gets exactly one started and one terminal event
#[tokio::test]
async fn test_one_start_and_one_terminal_per_dispatched_step() {
    let pipeline = pipeline_of(vec![ok_step("a", &[]), ok_step("b", &["a"]), ok_step("c", &[])]);

    let (events, _result) = run_collect(&pipeline, Value::Null).await;

    let mut started = step_ids(&events, EventType::StepStarted);
    let mut completed = step_ids(&events, EventType::StepComplete);
    started.sort();
    completed.sort();
    assert_eq!(started, vec!["a", "b", "c"]);
    assert_eq!(completed, started);
}

/// Terminal step events carry duration and progress; models show up in data
#[tokio::test]
async fn test_terminal_event_payload() {
    let pipeline = pipeline_of(vec![StepDefinition::new("ask", |_input, _ctx| async {
        Ok::<_, StepError>(StepOutput::new(json!("42")).with_model("model-x"))
    })
    .name("Ask the model")]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    let done = events.iter().find(|e| e.kind == EventType::StepComplete).unwrap();
    assert_eq!(done.step_name.as_deref(), Some("Ask the model"));
    assert_eq!(done.progress, Some(100));
    assert!(done.duration.is_some());
    assert_eq!(done.data.as_ref().unwrap()["model"], "model-x");
    assert_eq!(result.models, vec!["model-x"]);

    let wire = serde_json::to_value(done).unwrap();
    assert_eq!(wire["type"], "step-complete");
    assert_eq!(wire["stepId"], "ask");
}

/// An invalid graph fails before the run starts and emits nothing
#[tokio::test]
async fn test_invalid_graph_emits_no_events() {
    let pipeline = pipeline_of(vec![ok_step("a", &["b"]), ok_step("b", &["a"])]);

    let report = pipeline.validate();
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.contains("Cycle")));

    match pipeline.execute(Value::Null) {
        Err(PipelineError::Configuration { errors }) => assert_eq!(errors, report.errors),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("invalid pipeline started a run"),
    }
}

/// Reading events one at a time sees the same stream the result describes
#[tokio::test]
async fn test_incremental_consumption() {
    let pipeline = pipeline_of(vec![ok_step("a", &[]), ok_step("b", &["a"])]);

    let mut run = pipeline.execute(Value::Null).unwrap();
    let mut kinds = Vec::new();
    while let Some(event) = run.next_event().await {
        kinds.push(event.kind);
    }
    let result = run.finish().await.unwrap();

    assert_eq!(
        kinds,
        vec![
            EventType::PipelineStarted,
            EventType::StepStarted,
            EventType::StepComplete,
            EventType::StepStarted,
            EventType::StepComplete,
            EventType::PipelineComplete,
        ]
    );
    assert!(result.success);
}
