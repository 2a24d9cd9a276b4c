//! One step at a time, in topological order.

use crate::executor::{step_failed, Executor};
use crate::policy::run_step;
use async_trait::async_trait;
use stepgraph_core::{Graph, RunRecorder, RunResult, StepInput, Value, WorkflowError};
use tracing::{info, warn};

/// Runs steps one after another in a topological order of the graph.
///
/// The first failed step stops the run; its dependents are never attempted
/// and do not appear in the partial results.
#[derive(Debug, Clone, Copy)]
pub struct SequentialExecutor<'g> {
    graph: &'g Graph,
}

impl<'g> SequentialExecutor<'g> {
    /// Creates an executor over `graph`.
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl<'g> Executor for SequentialExecutor<'g> {
    async fn execute(&self, initial: Option<Value>) -> Result<RunResult, WorkflowError> {
        let order = self.graph.sorted_steps()?;
        info!("Running {} steps sequentially", order.len());

        let mut recorder = RunRecorder::new();
        for step in &order {
            let input = StepInput::resolve(step.dependencies(), recorder.outputs(), initial.as_ref());
            let result = match run_step(step, input).await {
                Ok(result) => result,
                Err(run_error) => {
                    warn!("Run stopped at step '{}': {}", step.name(), run_error);
                    return Ok(recorder.finish(Some(run_error)));
                }
            };

            let failure = result.error().filter(|_| result.is_failure()).cloned();
            recorder.record(result);
            if let Some(error) = failure {
                warn!("Run stopped: step '{}' failed", step.name());
                return Err(step_failed(step.name().clone(), error, recorder));
            }
        }

        let run = recorder.finish(None);
        info!(
            "Run finished: {} steps in {:?}",
            run.len(),
            run.duration().unwrap_or_default()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use stepgraph_core::{BoxError, Step};

    fn step(name: &str, deps: &[&str], output: Value) -> Step {
        Step::builder(name)
            .depends_on(deps.iter().copied())
            .run(move |_| {
                let output = output.clone();
                async move { Ok(output) }
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order() {
        let mut graph = Graph::new();
        graph
            .add(
                Step::builder("sum")
                    .depends_on(["left", "right"])
                    .run(|input: StepInput| async move {
                        let left = input.get("left").and_then(Value::as_i64).unwrap_or(0);
                        let right = input.get("right").and_then(Value::as_i64).unwrap_or(0);
                        Ok(json!(left + right))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .add(step("left", &[], json!(2)))
            .unwrap()
            .add(step("right", &[], json!(40)))
            .unwrap();

        let run = SequentialExecutor::new(&graph).execute(None).await.unwrap();
        assert!(run.is_success());
        assert_eq!(run.output("sum"), Some(&json!(42)));
        assert_eq!(run.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_stops_before_dependents() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut graph = Graph::new();
        graph
            .add(step("a", &[], json!(1)))
            .unwrap()
            .add(
                Step::builder("b")
                    .depends_on(["a"])
                    .run(|_| async { Err::<Value, BoxError>("broken".into()) })
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .add(
                Step::builder("c")
                    .depends_on(["b"])
                    .run(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok(Value::Null) }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let error = SequentialExecutor::new(&graph).execute(None).await.unwrap_err();
        let failure = error.as_step_error().unwrap();
        assert_eq!(failure.step_name.as_str(), "b");
        assert_eq!(failure.source.to_string(), "broken");
        assert!(failure.partial_results.step("a").unwrap().is_success());
        assert!(failure.partial_results.step("b").unwrap().is_failure());
        assert!(failure.partial_results.step("c").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_error_is_returned() {
        let mut graph = Graph::new();
        graph.add(step("a", &["ghost"], Value::Null)).unwrap();

        let error = SequentialExecutor::new(&graph).execute(None).await.unwrap_err();
        assert!(matches!(error, WorkflowError::MissingDependency { .. }));
    }
}
