//! Step descriptors and their execution policy.

use crate::error::{BoxError, RetryPolicyError, TaskError, WorkflowError};
use crate::input::StepInput;
use crate::task::{task_fn, Task};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Type-safe step name wrapper.
///
/// Names compare exactly: `"Fetch"` and `"fetch"` are different steps.
///
/// # Examples
///
/// ```
/// use stepgraph_core::StepName;
///
/// let name = StepName::new("fetch");
/// assert_eq!(name.as_str(), "fetch");
///
/// let name: StepName = "transform".into();
/// assert_eq!(name, StepName::new("transform"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&StepName> for StepName {
    fn from(s: &StepName) -> Self {
        s.clone()
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How the delay between retries grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Every retry waits the base delay.
    #[default]
    None,
    /// Retry `n` waits `delay * n`.
    Linear,
    /// Retry `n` waits `delay * 2^(n - 1)`.
    Exponential,
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::None => write!(f, "none"),
            Backoff::Linear => write!(f, "linear"),
            Backoff::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for Backoff {
    type Err = RetryPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Backoff::None),
            "linear" => Ok(Backoff::Linear),
            "exponential" => Ok(Backoff::Exponential),
            other => Err(RetryPolicyError(other.to_string())),
        }
    }
}

/// Retry policy for step execution.
///
/// A step is attempted at most `1 + max_retries` times.
///
/// # Examples
///
/// ```
/// use stepgraph_core::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(3, Duration::from_millis(50));
/// assert_eq!(policy.delay_for_retry(1), Duration::from_millis(50));
/// assert_eq!(policy.delay_for_retry(2), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_retry(3), Duration::from_millis(200));
///
/// let policy = RetryPolicy::linear(3, Duration::from_millis(50));
/// assert_eq!(policy.delay_for_retry(3), Duration::from_millis(150));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// How the delay grows with each retry.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retries with the same delay every time.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::None,
        }
    }

    /// Retries with a delay growing linearly.
    pub fn linear(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Linear,
        }
    }

    /// Retries with a delay doubling each time.
    pub fn exponential(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Calculates the delay before the given 1-based retry.
    ///
    /// A zero base delay always yields zero.
    pub fn delay_for_retry(&self, retry_number: u32) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let retry_number = retry_number.max(1);
        match self.backoff {
            Backoff::None => self.delay,
            Backoff::Linear => self.delay.saturating_mul(retry_number),
            Backoff::Exponential => self
                .delay
                .saturating_mul(2u32.saturating_pow(retry_number - 1)),
        }
    }
}

/// Serializable policy for a step: retries and timeout.
///
/// The default has no retries and no timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Retry policy when an attempt fails.
    pub retry: RetryPolicy,
    /// Time bound for each attempt. `None` runs without a bound.
    pub timeout: Option<Duration>,
}

impl StepConfig {
    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-attempt timeout. A zero duration disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }
}

/// Predicate over a step's resolved input.
pub type InputPredicate = Arc<dyn Fn(&StepInput) -> Result<bool, BoxError> + Send + Sync>;
/// Predicate deciding whether an attempt error may be retried.
pub type ErrorPredicate = Arc<dyn Fn(&TaskError) -> Result<bool, BoxError> + Send + Sync>;

/// Gate evaluated against a step's resolved input before it runs.
#[derive(Clone)]
pub enum Condition {
    /// Run only if the predicate holds.
    If(InputPredicate),
    /// Run only if the predicate does not hold.
    Unless(InputPredicate),
}

impl Condition {
    /// Returns whether the step should run for this input.
    pub fn should_run(&self, input: &StepInput) -> Result<bool, BoxError> {
        match self {
            Condition::If(predicate) => predicate(input),
            Condition::Unless(predicate) => predicate(input).map(|hit| !hit),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::If(_) => write!(f, "If(..)"),
            Condition::Unless(_) => write!(f, "Unless(..)"),
        }
    }
}

/// An immutable unit of work: a name, its dependencies, a task and a policy.
///
/// Build one with [`Step::builder`].
///
/// # Examples
///
/// ```
/// use stepgraph_core::{Step, StepInput};
/// use serde_json::json;
///
/// let step = Step::builder("double")
///     .depends_on(["fetch"])
///     .retries(2)
///     .run(|input: StepInput| async move {
///         let n = input.value().and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(json!(n * 2))
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(step.name().as_str(), "double");
/// assert_eq!(step.config().retry.max_retries, 2);
/// ```
#[derive(Clone)]
pub struct Step {
    name: StepName,
    dependencies: Vec<StepName>,
    task: Arc<dyn Task>,
    config: StepConfig,
    retry_if: Option<ErrorPredicate>,
    condition: Option<Condition>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("config", &self.config)
            .field("condition", &self.condition)
            .finish()
    }
}

impl Step {
    /// Starts building a step with the given name.
    pub fn builder(name: impl Into<StepName>) -> StepBuilder {
        StepBuilder::new(name)
    }

    /// Returns the step name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the dependency names, without duplicates, in declaration order.
    pub fn dependencies(&self) -> &[StepName] {
        &self.dependencies
    }

    /// Returns `true` if this step lists `name` as a dependency.
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.as_str() == name)
    }

    /// Returns the task.
    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    /// Returns the retry and timeout policy.
    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Returns the configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    /// Returns the condition, if any.
    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Evaluates the condition against `input`. Steps without one always run.
    pub fn should_run(&self, input: &StepInput) -> Result<bool, BoxError> {
        match &self.condition {
            Some(condition) => condition.should_run(input),
            None => Ok(true),
        }
    }

    /// Decides whether `error` may be retried. Defaults to `true`.
    pub fn accepts_retry(&self, error: &TaskError) -> Result<bool, BoxError> {
        match &self.retry_if {
            Some(predicate) => predicate(error),
            None => Ok(true),
        }
    }
}

/// Builder for [`Step`].
///
/// Configuration problems are reported by [`StepBuilder::build`].
pub struct StepBuilder {
    name: StepName,
    dependencies: Vec<StepName>,
    task: Option<Arc<dyn Task>>,
    config: StepConfig,
    retry_if: Option<ErrorPredicate>,
    when: Option<InputPredicate>,
    unless: Option<InputPredicate>,
    error: Option<String>,
}

impl fmt::Debug for StepBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepBuilder")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("config", &self.config)
            .finish()
    }
}

impl StepBuilder {
    /// Creates a builder for a step with no dependencies and default policy.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            task: None,
            config: StepConfig::default(),
            retry_if: None,
            when: None,
            unless: None,
            error: None,
        }
    }

    /// Adds dependencies. May be called more than once.
    pub fn depends_on<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<StepName>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    /// Sets the task.
    pub fn task(mut self, task: impl Task + 'static) -> Self {
        self.task = Some(Arc::new(task));
        self
    }

    /// Sets an async closure as the task.
    pub fn run<F, Fut>(self, f: F) -> Self
    where
        F: Fn(StepInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, BoxError>> + Send + 'static,
    {
        self.task(task_fn(f))
    }

    /// Replaces the whole policy.
    pub fn config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the maximum number of retries.
    pub fn retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    /// Sets the base delay between retries.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry.delay = delay;
        self
    }

    /// Sets the base delay between retries in seconds.
    ///
    /// Negative or non-finite values are rejected by [`build`](Self::build).
    pub fn retry_delay_secs(mut self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => self.config.retry.delay = delay,
            Err(_) => {
                self.error.get_or_insert_with(|| {
                    format!("step '{}' has invalid retry delay {secs}", self.name)
                });
            }
        }
        self
    }

    /// Sets how the retry delay grows.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    /// Retries only errors accepted by `predicate`.
    pub fn retry_if<P>(self, predicate: P) -> Self
    where
        P: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        self.try_retry_if(move |error| Ok(predicate(error)))
    }

    /// Like [`retry_if`](Self::retry_if), but the predicate may fail.
    ///
    /// A failing predicate stops the run with a run-level error.
    pub fn try_retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TaskError) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Sets the per-attempt timeout. A zero duration disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    /// Sets the per-attempt timeout in seconds. Values `<= 0` disable it;
    /// positive values below one nanosecond round up to one.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.config.timeout = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|_| secs > 0.0)
            .map(|t| t.max(Duration::from_nanos(1)));
        self
    }

    /// Runs the step only if `predicate` holds for its input.
    ///
    /// Takes precedence over [`unless`](Self::unless).
    pub fn when<P>(self, predicate: P) -> Self
    where
        P: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        self.try_when(move |input| Ok(predicate(input)))
    }

    /// Like [`when`](Self::when), but the predicate may fail.
    pub fn try_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&StepInput) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }

    /// Skips the step if `predicate` holds for its input.
    ///
    /// Ignored when [`when`](Self::when) is also set.
    pub fn unless<P>(self, predicate: P) -> Self
    where
        P: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        self.try_unless(move |input| Ok(predicate(input)))
    }

    /// Like [`unless`](Self::unless), but the predicate may fail.
    pub fn try_unless<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&StepInput) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.unless = Some(Arc::new(predicate));
        self
    }

    /// Builds the step.
    ///
    /// Fails with [`WorkflowError::Configuration`] if no task was supplied or
    /// a setter received an invalid value.
    pub fn build(self) -> Result<Step, WorkflowError> {
        if let Some(error) = self.error {
            return Err(WorkflowError::Configuration(error));
        }
        let task = self.task.ok_or_else(|| {
            WorkflowError::Configuration(format!("step '{}' has no task", self.name))
        })?;

        let mut dependencies: Vec<StepName> = Vec::with_capacity(self.dependencies.len());
        for dependency in self.dependencies {
            if !dependencies.contains(&dependency) {
                dependencies.push(dependency);
            }
        }

        let condition = match (self.when, self.unless) {
            (Some(predicate), _) => Some(Condition::If(predicate)),
            (None, Some(predicate)) => Some(Condition::Unless(predicate)),
            (None, None) => None,
        };

        Ok(Step {
            name: self.name,
            dependencies,
            task,
            config: self.config,
            retry_if: self.retry_if,
            condition,
        })
    }
}
