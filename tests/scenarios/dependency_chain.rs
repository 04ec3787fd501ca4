//! Test: dependency ordering, outputs flowing between steps, one-shot runs

use crate::helpers::*;
use pipeline_engine::core::{ExecutionContext, StepDefinition, StepError, StepOutput, StepStatus};
use pipeline_engine::execution::EventType;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// X then Y: X's terminal event comes first and both outputs are collected
#[tokio::test]
async fn test_two_step_chain() {
    let pipeline = pipeline_of(vec![ok_step("X", &[]), ok_step("Y", &["X"])]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    assert!(terminal_index(&events, "X") < terminal_index(&events, "Y"));
    assert!(result.success);
    assert_eq!(result.outputs.len(), 2);
    assert_eq!(result.output("X"), Some(&json!("X done")));
    assert_eq!(result.output("Y"), Some(&json!("Y done")));
}

/// No step starts before every dependency has a terminal event
#[tokio::test]
async fn test_no_step_starts_before_its_dependencies() {
    let pipeline = pipeline_of(vec![
        ok_step("deploy", &["test", "lint"]),
        ok_step("test", &["build"]),
        ok_step("lint", &["build"]),
        ok_step("build", &["fetch"]),
        ok_step("fetch", &[]),
    ]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;
    assert!(result.success);

    for step in pipeline.steps() {
        let started = events
            .iter()
            .position(|e| e.kind == EventType::StepStarted && e.step_id.as_deref() == Some(step.id.as_str()))
            .unwrap();
        for dep in &step.dependencies {
            assert!(
                terminal_index(&events, dep) < started,
                "{} started before {} finished",
                step.id,
                dep
            );
        }
    }
}

/// A derived input reads an upstream output at dispatch time
#[tokio::test]
async fn test_derived_input_reads_upstream_output() {
    let pipeline = pipeline_of(vec![
        StepDefinition::new("count", |input, _ctx| async move {
            let n = input["items"].as_array().map(|a| a.len()).unwrap_or(0);
            Ok::<_, StepError>(StepOutput::new(json!(n)))
        })
        .input_fn(|ctx: &ExecutionContext| ctx.inputs().clone()),
        StepDefinition::new("double", |input, _ctx| async move {
            Ok::<_, StepError>(StepOutput::new(json!(input.as_u64().unwrap_or(0) * 2)))
        })
        .depends_on(["count"])
        .input_fn(|ctx| ctx.output_value("count").unwrap_or(Value::Null)),
    ]);

    let result = pipeline.run(json!({ "items": [1, 2, 3] })).await.unwrap();

    assert_eq!(result.output("double"), Some(&json!(6)));
}

/// Steps share scratch state through the context
#[tokio::test]
async fn test_shared_state_between_steps() {
    let pipeline = pipeline_of(vec![
        StepDefinition::new("writer", |_input, ctx: ExecutionContext| async move {
            ctx.set_state("token", json!("abc"));
            Ok::<_, StepError>(StepOutput::new(Value::Null))
        }),
        StepDefinition::new("reader", |_input, ctx: ExecutionContext| async move {
            Ok::<_, StepError>(StepOutput::new(ctx.get_state("token").unwrap_or(Value::Null)))
        })
        .depends_on(["writer"]),
    ]);

    let result = pipeline.run(Value::Null).await.unwrap();

    assert_eq!(result.output("reader"), Some(&json!("abc")));
}

/// The one-shot entry point runs every work function exactly once
#[tokio::test]
async fn test_one_shot_run_executes_each_step_once() {
    let calls: Vec<Arc<AtomicU32>> = (0..4).map(|_| Arc::new(AtomicU32::new(0))).collect();
    let steps = calls
        .iter()
        .enumerate()
        .map(|(i, counter)| {
            let step = flaky_step(&format!("s{}", i), 0, counter.clone());
            if i == 0 {
                step
            } else {
                step.depends_on([format!("s{}", i - 1)])
            }
        })
        .collect();
    let pipeline = pipeline_of(steps);

    let result = pipeline.run(Value::Null).await.unwrap();

    assert!(result.success);
    for counter in &calls {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

/// A false condition skips the step without running it
#[tokio::test]
async fn test_condition_skip() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = pipeline_of(vec![
        ok_step("always", &[]),
        flaky_step("never", 0, calls.clone())
            .condition(|ctx| ctx.inputs()["enabled"].as_bool().unwrap_or(false)),
        ok_step("after", &["never"]),
    ]);

    let (events, result) = run_collect(&pipeline, json!({ "enabled": false })).await;

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_status(&result, "never", StepStatus::Skipped);
    let report = result.step("never").unwrap();
    assert_eq!(report.duration, 0);
    assert_eq!(report.retries, Some(0));
    assert_status(&result, "after", StepStatus::Complete);
    assert!(step_ids(&events, EventType::StepSkipped).contains(&"never".to_string()));
}

/// Every registered step ends with exactly one terminal status
#[tokio::test]
async fn test_every_step_reaches_a_terminal_state() {
    let pipeline = pipeline_of(vec![
        ok_step("a", &[]),
        failing_step("b", &["a"]),
        ok_step("c", &["b"]),
        ok_step("d", &["a"]),
        ok_step("e", &["c", "d"]),
        ok_step("f", &[]).condition(|_| false),
    ]);

    let (events, result) = run_collect(&pipeline, Value::Null).await;

    assert_eq!(result.steps.len(), 6);
    assert!(result.steps.iter().all(|s| s.status.is_terminal()));

    let mut terminal: Vec<_> = events
        .iter()
        .filter(|e| e.kind.is_step_terminal())
        .filter_map(|e| e.step_id.clone())
        .collect();
    terminal.sort();
    assert_eq!(terminal, vec!["a", "b", "c", "d", "e", "f"]);
}
