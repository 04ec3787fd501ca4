//! Test: retries, backoff and timeouts

use crate::helpers::*;
use pipeline_engine::core::{PipelineOptions, StepDefinition, StepError, StepOutput, StepStatus};
use pipeline_engine::execution::EventType;
use pipeline_engine::Pipeline;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Two failures then success with retries=2: three calls, backoff 1s then 2s
#[tokio::test(start_paused = true)]
async fn test_recovers_after_two_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = pipeline_of(vec![flaky_step("Z", 2, calls.clone()).retries(2)]);

    let start = Instant::now();
    let (events, result) = run_collect(&pipeline, Value::Null).await;
    let elapsed = start.elapsed();

    assert!(result.success);
    assert_status(&result, "Z", StepStatus::Complete);
    assert_eq!(result.step("Z").unwrap().retries, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let delays: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventType::StepRetry)
        .map(|e| e.data.as_ref().unwrap()["delay"].as_u64().unwrap())
        .collect();
    assert_eq!(delays, vec![1000, 2000]);
    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(3100));
}

/// retries=N never invokes the work function more than N+1 times
#[tokio::test(start_paused = true)]
async fn test_invocations_bounded_by_retries() {
    for retries in [0, 1, 4] {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = pipeline_of(vec![flaky_step("doomed", u32::MAX, calls.clone()).retries(retries)]);

        let result = pipeline.run(Value::Null).await.unwrap();

        assert_status(&result, "doomed", StepStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].attempt, retries + 1);
    }
}

/// A fixed retry delay replaces the exponential backoff
#[tokio::test(start_paused = true)]
async fn test_fixed_retry_delay() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = pipeline_of(vec![flaky_step("fixed", 3, calls.clone())
        .retries(3)
        .retry_delay(Duration::from_millis(250))]);

    let start = Instant::now();
    let result = pipeline.run(Value::Null).await.unwrap();

    assert!(result.success);
    assert!(start.elapsed() >= Duration::from_millis(750));
    assert!(start.elapsed() < Duration::from_millis(800));
}

/// The backoff base comes from the pipeline options
#[tokio::test(start_paused = true)]
async fn test_backoff_base_is_configurable() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut pipeline = Pipeline::with_options(
        "fast-backoff",
        PipelineOptions::default().backoff_base(Duration::from_millis(10)),
    );
    pipeline.add_step(flaky_step("z", 2, calls).retries(2));

    let start = Instant::now();
    pipeline.run(Value::Null).await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(100));
}

/// A hung attempt times out and is retried; the second attempt finishes
#[tokio::test(start_paused = true)]
async fn test_timeout_then_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let pipeline = pipeline_of(vec![StepDefinition::new("hang-once", move |_input, _ctx| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok::<_, StepError>(StepOutput::new(Value::Null))
        }
    })
    .timeout(Duration::from_millis(500))
    .retries(1)]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    assert_status(&result, "hang-once", StepStatus::Complete);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let retry = events.iter().find(|e| e.kind == EventType::StepRetry).unwrap();
    assert_eq!(
        retry.data.as_ref().unwrap()["error"],
        "Step timed out after 500ms"
    );
}

/// Without a per-step timeout the pipeline default applies
#[tokio::test(start_paused = true)]
async fn test_default_timeout_applies() {
    let mut pipeline = Pipeline::with_options(
        "default-timeout",
        PipelineOptions::default().default_timeout(Duration::from_secs(2)),
    );
    pipeline.add_step(sleepy_step("forever", 60_000));

    let result = pipeline.run(Value::Null).await.unwrap();

    assert_status(&result, "forever", StepStatus::Failed);
    assert_eq!(
        result.step("forever").unwrap().error.as_deref(),
        Some("Step timed out after 2000ms")
    );
}
