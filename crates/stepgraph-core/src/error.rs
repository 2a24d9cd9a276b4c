//! Error types for graph construction, validation and execution.

use crate::result::RunResult;
use crate::step::StepName;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by tasks and fallible predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared, cloneable form of a [`BoxError`].
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the public API.
///
/// Graph errors (`DuplicateStep`, `MissingDependency`, `Cycle`) come from
/// building and validating a [`Graph`](crate::Graph). A step whose final
/// attempt fails stops the run and surfaces as [`WorkflowError::Step`],
/// which carries the partial results.
///
/// # Non-Exhaustive
///
/// Always include a wildcard arm when matching:
///
/// ```
/// use stepgraph_core::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::DuplicateStep(name) => format!("{name} added twice"),
///         WorkflowError::Cycle { path } => format!("cycle of {} steps", path.len()),
///         WorkflowError::Step(failure) => format!("{} failed", failure.step_name),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step with this name was already added to the graph.
    #[error("Duplicate step: {0}")]
    DuplicateStep(StepName),

    /// A step depends on a name that is not in the graph.
    #[error("Step '{step_name}' depends on missing step '{dependency}'")]
    MissingDependency {
        /// The step declaring the dependency.
        step_name: StepName,
        /// The dependency that could not be found.
        dependency: StepName,
    },

    /// The graph contains a dependency cycle.
    #[error("Dependency cycle detected: {}", CyclePath(path))]
    Cycle {
        /// Steps along the cycle, each depending on the next.
        path: Vec<StepName>,
    },

    /// A step failed after exhausting its retries.
    #[error(transparent)]
    Step(#[from] Box<StepError>),

    /// A step or pipeline was configured incorrectly.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    /// Returns the step failure if this error stopped a run.
    pub fn as_step_error(&self) -> Option<&StepError> {
        match self {
            WorkflowError::Step(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns the partial results of a failed run, if any.
    pub fn partial_results(&self) -> Option<&RunResult> {
        self.as_step_error().map(|failure| &failure.partial_results)
    }
}

struct CyclePath<'a>(&'a [StepName]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{name}")?;
        }
        Ok(())
    }
}

/// The error produced by a single step attempt.
///
/// Cloneable so the same error can live in a [`StepResult`](crate::StepResult)
/// and in the [`StepError`] that stops the run.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TaskError {
    /// The task returned an error.
    #[error("{0}")]
    Raised(SharedError),

    /// The attempt did not finish within the configured timeout.
    #[error("Step '{step_name}' timed out after {timeout:?}")]
    TimedOut {
        /// The step that timed out.
        step_name: StepName,
        /// The configured bound.
        timeout: Duration,
    },

    /// The task panicked.
    #[error("Step '{step_name}' panicked: {details}")]
    Panicked {
        /// The step whose task panicked.
        step_name: StepName,
        /// Panic payload, when it was a string.
        details: String,
    },
}

impl TaskError {
    /// Wraps any error raised by a task.
    pub fn new(error: impl Into<BoxError>) -> Self {
        TaskError::Raised(Arc::from(error.into()))
    }

    /// Creates a task error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    /// Returns `true` if the attempt timed out.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, TaskError::TimedOut { .. })
    }

    /// Returns the underlying task error, if the task raised one.
    pub fn raised(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            TaskError::Raised(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<BoxError> for TaskError {
    fn from(error: BoxError) -> Self {
        TaskError::Raised(Arc::from(error))
    }
}

/// A step failed after all retries; the run stopped.
///
/// Carries everything that completed before the failure, including the
/// failed step's own [`StepResult`](crate::StepResult). Steps depending on
/// the failed one are absent from `partial_results`.
#[derive(Error, Debug)]
#[error("Step failed: {step_name}, details: {source}")]
pub struct StepError {
    /// The step whose final attempt failed.
    pub step_name: StepName,
    /// The final attempt's error.
    pub source: TaskError,
    /// Results recorded before the run stopped.
    pub partial_results: RunResult,
}

impl StepError {
    /// Creates a boxed step error, ready to wrap in [`WorkflowError::Step`].
    pub fn boxed(step_name: StepName, source: TaskError, partial_results: RunResult) -> Box<Self> {
        Box::new(Self {
            step_name,
            source,
            partial_results,
        })
    }
}

/// A run-fatal error raised outside a step's task.
///
/// These are stored in [`RunResult::error`](crate::RunResult::error) rather
/// than returned as a [`StepError`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RunError {
    /// A step's condition predicate returned an error.
    #[error("Condition for step '{step_name}' failed: {source}")]
    Condition {
        /// The step whose condition failed.
        step_name: StepName,
        /// The predicate's error.
        source: SharedError,
    },

    /// A step's retry predicate returned an error.
    #[error("Retry predicate for step '{step_name}' failed: {source}")]
    RetryPredicate {
        /// The step whose retry predicate failed.
        step_name: StepName,
        /// The predicate's error.
        source: SharedError,
    },

    /// A worker died before reporting an outcome.
    #[error("Worker aborted: {details}")]
    Worker {
        /// Why the worker stopped.
        details: String,
    },
}

impl RunError {
    /// Wraps a failing condition predicate.
    pub fn condition(step_name: StepName, error: BoxError) -> Self {
        RunError::Condition {
            step_name,
            source: Arc::from(error),
        }
    }

    /// Wraps a failing retry predicate.
    pub fn retry_predicate(step_name: StepName, error: BoxError) -> Self {
        RunError::RetryPredicate {
            step_name,
            source: Arc::from(error),
        }
    }
}

/// Error returned when parsing a [`Backoff`](crate::Backoff) fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown backoff '{0}', expected one of: none, linear, exponential")]
pub struct RetryPolicyError(pub String);
