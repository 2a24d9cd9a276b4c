//! The callable behind each step.

use crate::error::BoxError;
use crate::input::StepInput;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// The work a step performs.
///
/// A task receives the step's resolved [`StepInput`] and produces an output
/// value, or an error that the retry policy may act on.
///
/// # Examples
///
/// ```
/// use stepgraph_core::{StepInput, Task, BoxError};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct Sum;
///
/// #[async_trait]
/// impl Task for Sum {
///     async fn run(&self, input: StepInput) -> Result<Value, BoxError> {
///         let items = input.into_value();
///         let total: i64 = items
///             .as_array()
///             .ok_or("expected an array")?
///             .iter()
///             .filter_map(Value::as_i64)
///             .sum();
///         Ok(json!(total))
///     }
/// }
///
/// let output = tokio_test::block_on(Sum.run(StepInput::Single(json!([1, 2, 3]))));
/// assert_eq!(output.unwrap(), json!(6));
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Runs the task once.
    async fn run(&self, input: StepInput) -> Result<Value, BoxError>;
}

/// A [`Task`] backed by an async closure. Created by [`task_fn`].
#[derive(Clone)]
pub struct TaskFn<F> {
    f: F,
}

impl<F> fmt::Debug for TaskFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFn").finish_non_exhaustive()
    }
}

/// Wraps an async closure as a [`Task`].
///
/// ```
/// use stepgraph_core::{task_fn, StepInput, Task};
/// use serde_json::json;
///
/// let task = task_fn(|_input: StepInput| async { Ok(json!("done")) });
/// let output = tokio_test::block_on(task.run(StepInput::None));
/// assert_eq!(output.unwrap(), json!("done"));
/// ```
pub fn task_fn<F, Fut>(f: F) -> TaskFn<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    TaskFn { f }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    async fn run(&self, input: StepInput) -> Result<Value, BoxError> {
        (self.f)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_fn_passes_input() {
        let task = task_fn(|input: StepInput| async move { Ok(input.into_value()) });
        let output = tokio_test::block_on(task.run(StepInput::Single(json!(7))));
        assert_eq!(output.unwrap(), json!(7));
    }

    #[test]
    fn test_task_fn_error() {
        let task = task_fn(|_input: StepInput| async { Err::<Value, BoxError>("nope".into()) });
        let output = tokio_test::block_on(task.run(StepInput::None));
        assert_eq!(output.unwrap_err().to_string(), "nope");
    }
}
