//! Fetch, transform and load a small batch of numbers.
//!
//! Run with `RUST_LOG=debug` to see level dispatch and retries.

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepgraph::prelude::*;

fn numbers(input: &StepInput) -> Vec<i64> {
    input
        .value()
        .and_then(Value::as_array)
        .map(|xs| xs.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // The source fails once before answering.
    let fetches = Arc::new(AtomicU32::new(0));
    let counter = fetches.clone();

    let pipeline = Pipeline::builder()
        .step(
            Step::builder("fetch")
                .retries(2)
                .retry_delay(Duration::from_millis(20))
                .backoff(Backoff::Exponential)
                .timeout_secs(1.0)
                .run(move |_| {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 0 {
                            return Err::<Value, BoxError>("source not ready".into());
                        }
                        Ok(json!([1, 2, 3]))
                    }
                }),
        )
        .step(
            Step::builder("transform")
                .depends_on(["fetch"])
                .run(|input: StepInput| async move {
                    let doubled: Vec<i64> = numbers(&input).iter().map(|x| x * 2).collect();
                    Ok(json!(doubled))
                }),
        )
        .step(
            Step::builder("audit")
                .depends_on(["fetch"])
                .when(|input| numbers(input).len() > 100)
                .run(|_| async { Ok(json!("audited")) }),
        )
        .step(
            Step::builder("load")
                .depends_on(["transform", "audit"])
                .task(blocking_fn(|input| {
                    let rows = input.get("transform").cloned().unwrap_or_default();
                    let total: i64 = rows
                        .as_array()
                        .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
                        .unwrap_or(0);
                    Ok(json!(total))
                })),
        )
        .parallel(Some(2))
        .build()?;

    match pipeline.run(None).await {
        Ok(run) => {
            println!("Pipeline finished (success: {})", run.is_success());
            for (name, output) in run.outputs() {
                println!("  {name}: {output}");
            }
            println!("Skipped: {:?}", run.skipped());
            if let Some(error) = run.error() {
                eprintln!("Run error: {error}");
            }
        }
        Err(error) => {
            eprintln!("Pipeline failed: {error}");
            if let Some(partial) = error.partial_results() {
                eprintln!("Completed before failure: {:?}", partial.succeeded());
            }
        }
    }

    Ok(())
}
