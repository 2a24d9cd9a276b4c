use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepgraph::prelude::*;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn etl_pipeline() -> Pipeline {
    Pipeline::builder()
        .step(Step::builder("fetch").run(|_| async { Ok(json!([1, 2, 3])) }))
        .step(
            Step::builder("transform")
                .depends_on(["fetch"])
                .run(|input: StepInput| async move {
                    let doubled: Vec<i64> = input
                        .value()
                        .and_then(Value::as_array)
                        .map(|xs| xs.iter().filter_map(Value::as_i64).map(|x| x * 2).collect())
                        .unwrap_or_default();
                    Ok(json!(doubled))
                }),
        )
        .step(
            Step::builder("load")
                .depends_on(["transform"])
                .run(|input: StepInput| async move {
                    let total: i64 = input
                        .value()
                        .and_then(Value::as_array)
                        .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
                        .unwrap_or(0);
                    Ok(json!(total))
                }),
        )
        .build()
        .expect("valid pipeline")
}

/// Records when each attempt started and fails the first `failures` of them.
fn flaky(failures: u32, attempts: Arc<Mutex<Vec<Instant>>>) -> impl Task {
    task_fn(move |_| {
        let attempts = attempts.clone();
        async move {
            let attempt = {
                let mut attempts = attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len() as u32
            };
            if attempt <= failures {
                Err::<Value, BoxError>(format!("attempt {attempt}").into())
            } else {
                Ok(json!("recovered"))
            }
        }
    })
}

fn gaps(attempts: &Mutex<Vec<Instant>>) -> Vec<Duration> {
    let attempts = attempts.lock().unwrap();
    attempts.windows(2).map(|w| w[1] - w[0]).collect()
}

#[tokio::test]
async fn test_end_to_end_etl() {
    let run = assert_ok!(etl_pipeline().run_sequential(None).await);

    assert!(run.is_success());
    let outputs = run.outputs();
    let names: Vec<&str> = outputs.keys().map(StepName::as_str).collect();
    assert_eq!(names, vec!["fetch", "transform", "load"]);
    assert_eq!(outputs["fetch"], json!([1, 2, 3]));
    assert_eq!(outputs["transform"], json!([2, 4, 6]));
    assert_eq!(outputs["load"], json!(12));
}

#[tokio::test]
async fn test_sequential_and_parallel_agree() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("a").run(|_| async { Ok(json!(1)) }))
        .step(
            Step::builder("b")
                .depends_on(["a"])
                .run(|input: StepInput| async move {
                    Ok(json!(input.value().and_then(Value::as_i64).unwrap_or(0) + 10))
                }),
        )
        .step(
            Step::builder("c")
                .depends_on(["a"])
                .run(|input: StepInput| async move {
                    Ok(json!(input.value().and_then(Value::as_i64).unwrap_or(0) * 100))
                }),
        )
        .step(
            Step::builder("d")
                .depends_on(["b", "c"])
                .run(|input: StepInput| async move {
                    let b = input.get("b").and_then(Value::as_i64).unwrap_or(0);
                    let c = input.get("c").and_then(Value::as_i64).unwrap_or(0);
                    Ok(json!(b + c))
                }),
        )
        .build()
        .expect("valid pipeline");

    let sequential = assert_ok!(pipeline.run_sequential(None).await);
    let parallel = assert_ok!(pipeline.run_parallel(None, None).await);
    let capped = assert_ok!(pipeline.run_parallel(None, Some(1)).await);

    let mut expected = sequential.outputs();
    expected.sort_keys();
    for other in [&parallel, &capped] {
        let mut outputs = other.outputs();
        outputs.sort_keys();
        assert_eq!(outputs, expected);
    }
    assert_eq!(expected["d"], json!(111));
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let pipeline = etl_pipeline();
    let first = assert_ok!(pipeline.run(None).await);
    let second = assert_ok!(pipeline.run(None).await);
    assert_eq!(first.outputs(), second.outputs());
}

#[tokio::test]
async fn test_initial_input_reaches_root_steps() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("echo").run(|input: StepInput| async move { Ok(input.into_value()) }))
        .build()
        .expect("valid pipeline");

    let run = assert_ok!(pipeline.run(Some(json!({ "id": 7 }))).await);
    assert_eq!(run.output("echo"), Some(&json!({ "id": 7 })));
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_succeed() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::builder()
        .step(
            Step::builder("flaky")
                .task(flaky(2, attempts.clone()))
                .retries(3),
        )
        .build()
        .expect("valid pipeline");

    let run = assert_ok!(pipeline.run(None).await);
    let result = run.step("flaky").unwrap();
    assert!(result.is_success());
    assert_eq!(result.retries(), 2);
    assert_eq!(result.output(), Some(&json!("recovered")));
    assert_eq!(attempts.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_reports_last_error() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::builder()
        .step(
            Step::builder("doomed")
                .task(flaky(u32::MAX, attempts.clone()))
                .retries(3),
        )
        .build()
        .expect("valid pipeline");

    let error = assert_err!(pipeline.run(None).await);
    let failure = error.as_step_error().unwrap();
    assert_eq!(failure.step_name.as_str(), "doomed");
    assert_eq!(failure.source.to_string(), "attempt 4");
    assert_eq!(attempts.lock().unwrap().len(), 4);

    let result = failure.partial_results.step("doomed").unwrap();
    assert!(result.is_failure());
    assert_eq!(result.retries(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_gaps() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::builder()
        .step(
            Step::builder("flaky")
                .task(flaky(3, attempts.clone()))
                .retries(3)
                .retry_delay_secs(0.05)
                .backoff(Backoff::Exponential),
        )
        .build()
        .expect("valid pipeline");

    assert_ok!(pipeline.run(None).await);
    assert_eq!(
        gaps(&attempts),
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(200)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_linear_backoff_gaps() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::builder()
        .step(
            Step::builder("flaky")
                .task(flaky(3, attempts.clone()))
                .retries(3)
                .retry_delay(Duration::from_millis(50))
                .backoff(Backoff::Linear),
        )
        .build()
        .expect("valid pipeline");

    assert_ok!(pipeline.run(None).await);
    assert_eq!(
        gaps(&attempts),
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(150)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_step() {
    let pipeline = Pipeline::builder()
        .step(
            Step::builder("slow")
                .timeout_secs(0.1)
                .run(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                }),
        )
        .step(
            Step::builder("quick")
                .timeout_secs(1.0)
                .run(|_| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(json!("done"))
                }),
        )
        .build()
        .expect("valid pipeline");

    let error = assert_err!(pipeline.run_parallel(None, None).await);
    let failure = error.as_step_error().unwrap();
    assert_eq!(failure.step_name.as_str(), "slow");
    assert!(failure.source.is_timed_out());
    assert!(failure.partial_results.step("slow").unwrap().timed_out());

    let quick = failure.partial_results.step("quick").unwrap();
    assert!(quick.is_success());
    assert!(!quick.timed_out());
}

/// `gated` never runs; `follower` skips on its nil input, `fallback` runs on it.
fn skip_pipeline(counter: Arc<AtomicU32>) -> Pipeline {
    Pipeline::builder()
        .step(
            Step::builder("gated")
                .when(|_| false)
                .run(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!("never")) }
                }),
        )
        .step(
            Step::builder("follower")
                .depends_on(["gated"])
                .unless(StepInput::is_nil)
                .run(|_| async { Ok(json!("ran")) }),
        )
        .step(
            Step::builder("fallback")
                .depends_on(["gated"])
                .when(StepInput::is_nil)
                .run(|_| async { Ok(json!("fallback")) }),
        )
        .build()
        .expect("valid pipeline")
}

#[tokio::test]
async fn test_false_condition_skips_and_propagates_nil() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = skip_pipeline(calls.clone());

    let run = assert_ok!(pipeline.run(None).await);
    assert!(run.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let gated = run.step("gated").unwrap();
    assert!(gated.is_skipped());
    assert_eq!(gated.output(), None);
    assert_eq!(gated.duration(), Duration::ZERO);
    assert_eq!(gated.retries(), 0);

    assert!(run.step("follower").unwrap().is_skipped());
    assert_eq!(run.output("fallback"), Some(&json!("fallback")));
    assert_eq!(run.outputs()["gated"], Value::Null);

    let skipped: Vec<&str> = run.skipped().into_iter().map(StepName::as_str).collect();
    assert_eq!(skipped, vec!["gated", "follower"]);
}

#[tokio::test]
async fn test_skipped_steps_agree_across_executors() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = skip_pipeline(calls.clone());

    let sequential = assert_ok!(pipeline.run_sequential(None).await);
    let parallel = assert_ok!(pipeline.run_parallel(None, None).await);
    let capped = assert_ok!(pipeline.run_parallel(None, Some(1)).await);

    let mut expected = sequential.outputs();
    expected.sort_keys();
    for other in [&parallel, &capped] {
        let mut outputs = other.outputs();
        outputs.sort_keys();
        assert_eq!(outputs, expected);
        assert_eq!(other.skipped(), sequential.skipped());
    }
    assert_eq!(expected["fallback"], json!("fallback"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_partial_results_on_failure() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("a").run(|_| async { Ok(json!("a")) }))
        .step(Step::builder("b").run(|_| async { Ok(json!("b")) }))
        .step(
            Step::builder("c")
                .depends_on(["a", "b"])
                .run(|_| async { Err::<Value, BoxError>("c exploded".into()) }),
        )
        .step(
            Step::builder("d")
                .depends_on(["c"])
                .run(|_| async { Ok(json!("d")) }),
        )
        .build()
        .expect("valid pipeline");

    for parallel in [false, true] {
        let outcome = if parallel {
            pipeline.run_parallel(None, None).await
        } else {
            pipeline.run_sequential(None).await
        };
        let error = assert_err!(outcome);
        assert_eq!(error.to_string(), "Step failed: c, details: c exploded");

        let partial = error.partial_results().unwrap();
        assert!(partial.step("a").unwrap().is_success());
        assert!(partial.step("b").unwrap().is_success());
        assert!(partial.step("c").unwrap().is_failure());
        assert!(partial.step("d").is_none());
        assert!(partial.is_failure());
    }
}

#[tokio::test]
async fn test_predicate_errors_land_in_run_error() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("first").run(|_| async { Ok(json!(1)) }))
        .step(
            Step::builder("picky")
                .depends_on(["first"])
                .try_retry_if(|_| Err("cannot classify".into()))
                .retries(2)
                .run(|_| async { Err::<Value, BoxError>("boom".into()) }),
        )
        .build()
        .expect("valid pipeline");

    let run = assert_ok!(pipeline.run(None).await);
    assert!(run.is_failure());
    match run.error() {
        Some(RunError::RetryPredicate { step_name, .. }) => assert_eq!(step_name.as_str(), "picky"),
        other => panic!("unexpected run error: {other:?}"),
    }
    assert!(run.step("first").unwrap().is_success());
    assert!(run.step("picky").is_none());
}

#[tokio::test]
async fn test_panicking_condition_is_a_run_error_in_both_modes() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("a").run(|_| async { Ok(json!(1)) }))
        .step(
            Step::builder("gate")
                .depends_on(["a"])
                .when(|_| panic!("predicate bug"))
                .run(|_| async { Ok(json!("gate")) }),
        )
        .build()
        .expect("valid pipeline");

    for parallel in [false, true] {
        let outcome = if parallel {
            pipeline.run_parallel(None, None).await
        } else {
            pipeline.run_sequential(None).await
        };
        let run = assert_ok!(outcome);
        assert!(run.is_failure());
        match run.error() {
            Some(RunError::Condition { step_name, source }) => {
                assert_eq!(step_name.as_str(), "gate");
                assert!(source.to_string().contains("predicate bug"));
            }
            other => panic!("unexpected run error: {other:?}"),
        }
        assert!(run.step("a").unwrap().is_success());
        assert!(run.step("gate").is_none());
    }
}

#[test]
fn test_missing_task_is_a_configuration_error() {
    let result = Pipeline::builder().step(Step::builder("empty")).build();
    match result {
        Err(WorkflowError::Configuration(message)) => assert!(message.contains("empty")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_graph_is_reported_at_run() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("a").depends_on(["b"]).run(|_| async { Ok(Value::Null) }))
        .step(Step::builder("b").depends_on(["a"]).run(|_| async { Ok(Value::Null) }))
        .build()
        .expect("validation happens at run time");

    let error = assert_err!(pipeline.run(None).await);
    match error {
        WorkflowError::Cycle { path } => {
            assert_eq!(path.first(), path.last());
            assert!(path.len() >= 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_blocking_task_in_pipeline() {
    let pipeline = Pipeline::builder()
        .step(Step::builder("source").run(|_| async { Ok(json!("stepgraph")) }))
        .step(
            Step::builder("length")
                .depends_on(["source"])
                .task(blocking_fn(|input| {
                    let text = input.value().and_then(Value::as_str).unwrap_or_default();
                    Ok(json!(text.len()))
                })),
        )
        .build()
        .expect("valid pipeline");

    let run = assert_ok!(pipeline.run_parallel(None, Some(2)).await);
    assert_eq!(run.output("length"), Some(&json!(9)));
}

#[tokio::test]
async fn test_run_result_to_value() {
    let run = assert_ok!(etl_pipeline().run(None).await);
    let dump = run.to_value();
    assert_eq!(dump["success"], json!(true));
    assert_eq!(dump["steps"]["load"]["output"], json!(12));
    assert_eq!(dump["steps"]["load"]["status"], json!("success"));
}
