//! Assembling steps into a runnable pipeline.

use crate::executor::{ExecutionMode, Executor, ExecutorConfig};
use crate::parallel::ParallelExecutor;
use crate::sequential::SequentialExecutor;
use stepgraph_core::{Graph, RunResult, Step, StepBuilder, Value, WorkflowError};

/// A graph of steps plus the executor settings used by [`Pipeline::run`].
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    graph: Graph,
    config: ExecutorConfig,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Returns the underlying graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Returns the executor settings.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs the pipeline with the configured executor.
    pub async fn run(&self, initial: Option<Value>) -> Result<RunResult, WorkflowError> {
        match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(initial).await,
            ExecutionMode::Parallel => {
                self.run_parallel(initial, self.config.max_concurrency)
                    .await
            }
        }
    }

    /// Runs the pipeline one step at a time.
    pub async fn run_sequential(&self, initial: Option<Value>) -> Result<RunResult, WorkflowError> {
        SequentialExecutor::new(&self.graph).execute(initial).await
    }

    /// Runs the pipeline level by level. `None` or `Some(0)` is unbounded.
    pub async fn run_parallel(
        &self,
        initial: Option<Value>,
        max_concurrency: Option<usize>,
    ) -> Result<RunResult, WorkflowError> {
        ParallelExecutor::new(&self.graph)
            .with_max_concurrency(max_concurrency.unwrap_or(0))
            .execute(initial)
            .await
    }
}

/// Builder for constructing [`Pipeline`] instances.
///
/// The first error raised while adding steps is kept and returned by
/// [`build`](Self::build); later steps are ignored.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    graph: Graph,
    config: ExecutorConfig,
    error: Option<WorkflowError>,
}

impl PipelineBuilder {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds `step` and adds it.
    pub fn step(self, step: StepBuilder) -> Self {
        match step.build() {
            Ok(step) => self.add_step(step),
            Err(e) => self.fail(e),
        }
    }

    /// Adds an already built step.
    pub fn add_step(mut self, step: Step) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = self.graph.add(step) {
            return self.fail(e);
        }
        self
    }

    /// Sets the executor used by [`Pipeline::run`].
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for `config(ExecutorConfig::parallel(max_concurrency))`.
    pub fn parallel(self, max_concurrency: Option<usize>) -> Self {
        self.config(ExecutorConfig::parallel(max_concurrency))
    }

    /// Builds the pipeline.
    ///
    /// The graph is validated when it runs, not here.
    pub fn build(self) -> Result<Pipeline, WorkflowError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Pipeline {
            graph: self.graph,
            config: self.config,
        })
    }

    fn fail(mut self, error: WorkflowError) -> Self {
        self.error.get_or_insert(error);
        self
    }
}
