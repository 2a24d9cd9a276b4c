//! Level-by-level execution with concurrent steps inside each level.

use crate::executor::{step_failed, Executor};
use crate::policy::run_step;
use async_trait::async_trait;
use std::sync::Arc;
use stepgraph_core::{
    Graph, RunError, RunRecorder, RunResult, StepInput, StepName, TaskError, Value, WorkflowError,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Runs each level of the graph concurrently, one level after another.
///
/// Level `k + 1` starts only once every dispatched step of level `k` has
/// finished. With a concurrency cap, a level is split into batches of that
/// size which run one after another.
///
/// Workers report their outcome back to the executor, which is the only
/// place outputs and results are recorded. When a step fails, steps already
/// running are allowed to finish and nothing further is dispatched. If
/// several steps fail together, the first outcome to arrive is the one
/// reported.
#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutor<'g> {
    graph: &'g Graph,
    max_concurrency: Option<usize>,
}

enum Halt {
    Step(StepName, TaskError),
    Run(RunError),
}

impl<'g> ParallelExecutor<'g> {
    /// Creates an executor over `graph` with unbounded concurrency.
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            max_concurrency: None,
        }
    }

    /// Caps how many steps of a level run at once. `0` means unbounded.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency).filter(|n| *n > 0);
        self
    }

    /// Returns the concurrency cap, if any.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }
}

#[async_trait]
impl<'g> Executor for ParallelExecutor<'g> {
    async fn execute(&self, initial: Option<Value>) -> Result<RunResult, WorkflowError> {
        let levels = self.graph.levels()?;
        info!(
            "Running {} steps in {} levels (max concurrency: {:?})",
            self.graph.len(),
            levels.len(),
            self.max_concurrency
        );

        let mut recorder = RunRecorder::new();
        let mut halt: Option<Halt> = None;

        'levels: for (depth, level) in levels.iter().enumerate() {
            let batch_size = self.max_concurrency.unwrap_or(level.len()).max(1);
            for batch in level.chunks(batch_size) {
                debug!("Dispatching {} steps from level {}", batch.len(), depth);

                let mut workers = JoinSet::new();
                for step in batch {
                    let input =
                        StepInput::resolve(step.dependencies(), recorder.outputs(), initial.as_ref());
                    let step = Arc::clone(step);
                    workers.spawn(async move { run_step(&step, input).await });
                }

                while let Some(joined) = workers.join_next().await {
                    match joined {
                        Ok(Ok(result)) => {
                            if halt.is_none() && result.is_failure() {
                                if let Some(error) = result.error() {
                                    halt = Some(Halt::Step(result.name().clone(), error.clone()));
                                }
                            }
                            recorder.record(result);
                        }
                        Ok(Err(run_error)) => halt_with(&mut halt, run_error),
                        Err(join_error) => halt_with(
                            &mut halt,
                            RunError::Worker {
                                details: join_error.to_string(),
                            },
                        ),
                    }
                }

                if halt.is_some() {
                    break 'levels;
                }
            }
        }

        match halt {
            None => {
                let run = recorder.finish(None);
                info!(
                    "Run finished: {} steps in {:?}",
                    run.len(),
                    run.duration().unwrap_or_default()
                );
                Ok(run)
            }
            Some(Halt::Step(step_name, error)) => {
                warn!("Run stopped: step '{}' failed", step_name);
                Err(step_failed(step_name, error, recorder))
            }
            Some(Halt::Run(run_error)) => {
                warn!("Run stopped: {}", run_error);
                Ok(recorder.finish(Some(run_error)))
            }
        }
    }
}

/// Stops the run with `error` unless it is already stopping, in which case
/// `error` is only logged.
fn halt_with(halt: &mut Option<Halt>, error: RunError) {
    if halt.is_some() {
        warn!("Run already stopping, dropping later error: {}", error);
        return;
    }
    *halt = Some(Halt::Run(error));
}
