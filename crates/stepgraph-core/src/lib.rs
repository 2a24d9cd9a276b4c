//! Core types for the stepgraph executor.
//!
//! This crate has no runtime dependencies. It describes what to run; the
//! `stepgraph` crate runs it.
//!
//! # Core Types
//!
//! - [`Step`] - An immutable unit of work with dependencies and policy
//! - [`Task`] - The callable behind a step
//! - [`StepInput`] - What a task receives, resolved from upstream outputs
//! - [`Graph`] - Validation, topological order and levels
//! - [`StepResult`] / [`RunResult`] - Outcomes of steps and runs
//! - [`WorkflowError`] - Errors for graph building, validation and execution

mod error;
mod graph;
mod input;
mod result;
mod step;
mod task;

pub use error::{
    BoxError, RetryPolicyError, RunError, SharedError, StepError, TaskError, WorkflowError,
};
pub use graph::Graph;
pub use input::{Outputs, StepInput};
pub use result::{RunRecorder, RunResult, StepResult, StepStatus};
pub use step::{
    Backoff, Condition, ErrorPredicate, InputPredicate, RetryPolicy, Step, StepBuilder,
    StepConfig, StepName,
};
pub use task::{task_fn, Task, TaskFn};

pub use serde_json::Value;
