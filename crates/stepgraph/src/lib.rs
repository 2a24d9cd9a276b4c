//! An in-process task-dependency executor.
//!
//! Steps name the steps they depend on, receive those steps' outputs as
//! input, and run under a per-step policy of retries, backoff, timeout and
//! an optional run condition. A [`Pipeline`] runs them either one at a time
//! or level by level with the steps of a level running concurrently.
//!
//! # Example
//!
//! ```rust
//! use stepgraph::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let pipeline = Pipeline::builder()
//!         .step(Step::builder("fetch").run(|_| async { Ok(json!([1, 2, 3])) }))
//!         .step(
//!             Step::builder("total")
//!                 .depends_on(["fetch"])
//!                 .run(|input: StepInput| async move {
//!                     let items = input.into_value();
//!                     let total: i64 = items
//!                         .as_array()
//!                         .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
//!                         .unwrap_or(0);
//!                     Ok(json!(total))
//!                 }),
//!         )
//!         .build()?;
//!
//!     let run = pipeline.run(None).await?;
//!     assert_eq!(run.output("total"), Some(&json!(6)));
//!     Ok(())
//! }
//! ```

mod blocking;
mod executor;
mod parallel;
mod pipeline;
mod policy;
mod sequential;

// Re-export core types
pub use stepgraph_core::*;

pub use blocking::{blocking_fn, BlockingFn};
pub use executor::{ExecutionMode, Executor, ExecutorConfig};
pub use parallel::ParallelExecutor;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use sequential::SequentialExecutor;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        blocking_fn, task_fn, Backoff, BoxError, ExecutionMode, Executor, ExecutorConfig, Graph,
        ParallelExecutor, Pipeline, PipelineBuilder, RetryPolicy, RunError, RunResult,
        SequentialExecutor, Step, StepBuilder, StepConfig, StepInput, StepName, StepResult,
        StepStatus, Task, TaskError, Value, WorkflowError,
    };
}
