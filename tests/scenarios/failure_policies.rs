//! Test: onError policies, stop_on_error and failure propagation

use crate::helpers::*;
use pipeline_engine::core::{
    OnError, PipelineOptions, StepDefinition, StepError, StepOutput, StepStatus,
};
use pipeline_engine::execution::EventType;
use pipeline_engine::Pipeline;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// onError=skip turns a failure into a skip and keeps the run successful
#[tokio::test]
async fn test_skip_policy_keeps_run_successful() {
    let pipeline = pipeline_of(vec![
        failing_step("W", &[]).on_error(OnError::Skip),
        ok_step("other", &[]),
    ]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    assert!(result.success);
    assert_status(&result, "W", StepStatus::Skipped);
    assert_eq!(result.step("W").unwrap().error.as_deref(), Some("W broke"));
    assert!(result.errors.is_empty());
    assert_eq!(events.last().unwrap().kind, EventType::PipelineComplete);
}

/// onError=continue behaves like skip and lets dependents run
#[tokio::test]
async fn test_continue_policy_lets_dependents_run() {
    let pipeline = pipeline_of(vec![
        failing_step("optional", &[]).on_error(OnError::Continue),
        ok_step("next", &["optional"]),
    ]);

    let result = pipeline.run(Value::Null).await.unwrap();

    assert!(result.success);
    assert_status(&result, "optional", StepStatus::Skipped);
    assert_status(&result, "next", StepStatus::Complete);
}

/// stop_on_error: U fails, V (depends on U) is never dispatched and ends skipped
#[tokio::test]
async fn test_stop_on_error_skips_dependent() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut pipeline = Pipeline::with_options("stop", PipelineOptions::default().stop_on_error(true));
    pipeline.add_steps([
        failing_step("U", &[]),
        flaky_step("V", 0, calls.clone()).depends_on(["U"]),
    ]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    assert!(!result.success);
    assert_status(&result, "U", StepStatus::Failed);
    assert_status(&result, "V", StepStatus::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!step_ids(&events, EventType::StepStarted).contains(&"V".to_string()));
    assert_eq!(events.last().unwrap().kind, EventType::PipelineFailed);
}

/// stop_on_error halts dispatch; unrelated steps not yet started stay pending
#[tokio::test]
async fn test_stop_on_error_halts_later_batches() {
    let mut pipeline = Pipeline::with_options(
        "stop",
        PipelineOptions::default().stop_on_error(true).max_concurrency(1),
    );
    pipeline.add_steps([failing_step("first", &[]), ok_step("second", &[])]);

    let result = pipeline.run(Value::Null).await.unwrap();

    assert!(!result.success);
    assert_status(&result, "second", StepStatus::Pending);
    assert_eq!(result.step("second").unwrap().retries, None);
}

/// Without stop_on_error, independent branches keep running after a failure
#[tokio::test]
async fn test_failure_only_blocks_its_own_branch() {
    let pipeline = pipeline_of(vec![
        failing_step("a", &[]),
        ok_step("a2", &["a"]),
        ok_step("a3", &["a2"]),
        ok_step("b", &[]),
        ok_step("b2", &["b"]),
    ]);

    let result = pipeline.run(Value::Null).await.unwrap();

    assert!(!result.success);
    assert_status(&result, "a", StepStatus::Failed);
    assert_status(&result, "a2", StepStatus::Skipped);
    assert_status(&result, "a3", StepStatus::Skipped);
    assert_status(&result, "b2", StepStatus::Complete);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].step, "a");
}

/// on_fail runs once after the last attempt
#[tokio::test(start_paused = true)]
async fn test_on_fail_hook_runs_after_final_attempt() {
    let hook_calls = Arc::new(AtomicU32::new(0));
    let counter = hook_calls.clone();
    let pipeline = pipeline_of(vec![failing_step("x", &[])
        .retries(2)
        .on_fail(move |_err, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
        })]);

    pipeline.run(Value::Null).await.unwrap();

    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
}

/// A step that panics on every attempt is retried and then handled by its onError policy
#[tokio::test]
async fn test_panicking_step_follows_retry_and_error_policy() {
    let calls = Arc::new(AtomicU32::new(0));
    let failures = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let hook_counter = failures.clone();
    let step = StepDefinition::new("explodes", move |_input, _ctx| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < u32::MAX {
                panic!("parser crashed");
            }
            Ok::<_, StepError>(StepOutput::new(Value::Null))
        }
    })
    .retries(2)
    .on_error(OnError::Continue)
    .on_fail(move |_err, _ctx| {
        hook_counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut pipeline = pipeline_of(vec![step, ok_step("after", &["explodes"])]);
    pipeline.options = PipelineOptions::default().backoff_base(Duration::from_millis(1));

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_status(&result, "explodes", StepStatus::Skipped);
    assert_eq!(result.step("explodes").unwrap().retries, Some(2));
    assert_status(&result, "after", StepStatus::Complete);
    assert_eq!(step_ids(&events, EventType::StepRetry), vec!["explodes", "explodes"]);
    assert!(result.errors.is_empty());
}
