//! The executor seam and its configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepgraph_core::{RunRecorder, RunResult, StepError, StepName, TaskError, Value, WorkflowError};

/// Drives a validated graph to a [`RunResult`].
///
/// Implementations differ only in scheduling. They share input resolution
/// and the per-step policy, so a deterministic graph produces the same
/// outputs under every executor.
///
/// `execute` returns:
///
/// - `Ok(run)` with `run.is_success()` when every step succeeded or was skipped
/// - `Ok(run)` with [`RunResult::error`] set when a condition or retry
///   predicate failed
/// - `Err(WorkflowError::Step(..))` when a step's final attempt failed, with
///   the partial results inside
/// - `Err(..)` with a graph error when validation fails
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs every step, feeding `initial` to the steps without dependencies.
    async fn execute(&self, initial: Option<Value>) -> Result<RunResult, WorkflowError>;
}

/// Which executor a pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One step at a time, in topological order.
    #[default]
    Sequential,
    /// Level by level, steps within a level concurrently.
    Parallel,
}

/// Executor selection for [`Pipeline::run`](crate::Pipeline::run).
///
/// ```
/// use stepgraph::{ExecutionMode, ExecutorConfig};
///
/// let config: ExecutorConfig =
///     serde_json::from_str(r#"{ "mode": "parallel", "max_concurrency": 4 }"#).unwrap();
/// assert_eq!(config.mode, ExecutionMode::Parallel);
/// assert_eq!(config.max_concurrency, Some(4));
///
/// assert_eq!(ExecutorConfig::default().mode, ExecutionMode::Sequential);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Scheduling strategy.
    pub mode: ExecutionMode,
    /// Cap on concurrently running steps within a level. Parallel mode only;
    /// `None` or `Some(0)` is unbounded.
    pub max_concurrency: Option<usize>,
}

impl ExecutorConfig {
    /// Sequential execution.
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Parallel execution with an optional concurrency cap.
    pub fn parallel(max_concurrency: Option<usize>) -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_concurrency,
        }
    }
}

/// Freezes the recorder into partial results and wraps the failure.
pub(crate) fn step_failed(step_name: StepName, error: TaskError, recorder: RunRecorder) -> WorkflowError {
    WorkflowError::Step(StepError::boxed(step_name, error, recorder.finish(None)))
}
