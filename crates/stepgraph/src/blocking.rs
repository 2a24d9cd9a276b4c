//! Synchronous closures as tasks.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use stepgraph_core::{BoxError, StepInput, Task, Value};

/// A [`Task`] backed by a synchronous closure. Created by [`blocking_fn`].
pub struct BlockingFn<F> {
    f: Arc<F>,
}

impl<F> Clone for BlockingFn<F> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<F> fmt::Debug for BlockingFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingFn").finish_non_exhaustive()
    }
}

/// Wraps a synchronous closure as a [`Task`].
///
/// The closure runs on tokio's blocking pool, so it may block on I/O or
/// compute without stalling other steps. A timeout cannot interrupt it: a
/// timed-out call keeps running until it returns.
///
/// ```
/// use stepgraph::{blocking_fn, Step};
/// use serde_json::json;
///
/// let step = Step::builder("checksum")
///     .task(blocking_fn(|input| {
///         let text = input.into_value().to_string();
///         Ok(json!(text.len()))
///     }))
///     .build()
///     .unwrap();
/// # let _ = step;
/// ```
pub fn blocking_fn<F>(f: F) -> BlockingFn<F>
where
    F: Fn(StepInput) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    BlockingFn { f: Arc::new(f) }
}

#[async_trait]
impl<F> Task for BlockingFn<F>
where
    F: Fn(StepInput) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    async fn run(&self, input: StepInput) -> Result<Value, BoxError> {
        let f = Arc::clone(&self.f);
        tokio::task::spawn_blocking(move || f(input)).await?
    }
}
