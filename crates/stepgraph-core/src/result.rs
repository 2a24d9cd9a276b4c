//! Outcomes of single steps and of whole runs.

use crate::error::{RunError, TaskError};
use crate::input::Outputs;
use crate::step::StepName;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Final status of a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The step produced an output.
    Success,
    /// The step's final attempt failed.
    Failed,
    /// The step's condition did not hold; its task was not invoked.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Immutable outcome of one step in one run.
///
/// Only the final attempt is recorded; earlier attempts show up in
/// [`retries`](Self::retries).
#[derive(Debug, Clone)]
pub struct StepResult {
    name: StepName,
    output: Option<Value>,
    duration: Duration,
    started_at: Option<DateTime<Utc>>,
    error: Option<TaskError>,
    retries: u32,
    timed_out: bool,
    status: StepStatus,
}

impl StepResult {
    /// A step that produced `output`.
    pub fn success(
        name: StepName,
        output: Value,
        duration: Duration,
        started_at: DateTime<Utc>,
        retries: u32,
    ) -> Self {
        Self {
            name,
            output: Some(output),
            duration,
            started_at: Some(started_at),
            error: None,
            retries,
            timed_out: false,
            status: StepStatus::Success,
        }
    }

    /// A step whose final attempt failed with `error`.
    ///
    /// The timed-out flag is taken from the error.
    pub fn failure(
        name: StepName,
        error: TaskError,
        duration: Duration,
        started_at: DateTime<Utc>,
        retries: u32,
    ) -> Self {
        Self {
            name,
            output: None,
            duration,
            started_at: Some(started_at),
            timed_out: error.is_timed_out(),
            error: Some(error),
            retries,
            status: StepStatus::Failed,
        }
    }

    /// A step whose condition did not hold.
    pub fn skipped(name: StepName, started_at: DateTime<Utc>) -> Self {
        Self {
            name,
            output: None,
            duration: Duration::ZERO,
            started_at: Some(started_at),
            error: None,
            retries: 0,
            timed_out: false,
            status: StepStatus::Skipped,
        }
    }

    /// Returns the step name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the output. Absent for skipped and failed steps.
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Returns the time spent across all attempts, including retry delays.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns when the step started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the final attempt's error.
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Returns how many retries were consumed.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns `true` if the final attempt timed out.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Returns the status.
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Returns `true` if the step succeeded.
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Returns `true` if the step failed.
    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failed
    }

    /// Returns `true` if the step was skipped.
    pub fn is_skipped(&self) -> bool {
        self.status == StepStatus::Skipped
    }

    /// Dumps every field as JSON for logging.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "status": self.status,
            "output": self.output,
            "duration_ms": self.duration.as_secs_f64() * 1000.0,
            "started_at": self.started_at,
            "error": self.error.as_ref().map(ToString::to_string),
            "retries": self.retries,
            "timed_out": self.timed_out,
        })
    }
}

/// Immutable snapshot of a whole run.
///
/// A run succeeds when it has no run-level [`error`](Self::error) and no
/// step failed. Skipped steps do not count as failures.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    results: IndexMap<StepName, StepResult>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<RunError>,
}

impl RunResult {
    /// Returns `true` if the run completed without any failure.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.results.values().any(StepResult::is_failure)
    }

    /// Returns `true` if the run did not succeed.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Returns the result of step `name`, if it was recorded.
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.results.get(name)
    }

    /// Returns the output of step `name`, if it produced one.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.step(name).and_then(StepResult::output)
    }

    /// Returns the output of every recorded step, `null` where there is none.
    pub fn outputs(&self) -> Outputs {
        self.results
            .iter()
            .map(|(name, result)| (name.clone(), result.output().cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Returns all step results in the order they were recorded.
    pub fn results(&self) -> &IndexMap<StepName, StepResult> {
        &self.results
    }

    /// Returns the number of recorded steps.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if no step was recorded.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the names of steps that succeeded.
    pub fn succeeded(&self) -> Vec<&StepName> {
        self.with_status(StepStatus::Success)
    }

    /// Returns the names of steps that failed.
    pub fn failed(&self) -> Vec<&StepName> {
        self.with_status(StepStatus::Failed)
    }

    /// Returns the names of steps that were skipped.
    pub fn skipped(&self) -> Vec<&StepName> {
        self.with_status(StepStatus::Skipped)
    }

    fn with_status(&self, status: StepStatus) -> Vec<&StepName> {
        self.results
            .values()
            .filter(|r| r.status() == status)
            .map(StepResult::name)
            .collect()
    }

    /// Returns when the run started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the run finished.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns the wall time of the run, if both timestamps are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(finish)) => (finish - start).to_std().ok(),
            _ => None,
        }
    }

    /// Returns the run-level error, if something outside a step's task failed.
    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    /// Dumps every field as JSON for logging.
    pub fn to_value(&self) -> Value {
        let steps: serde_json::Map<String, Value> = self
            .results
            .iter()
            .map(|(name, result)| (name.as_str().to_string(), result.to_value()))
            .collect();
        json!({
            "success": self.is_success(),
            "started_at": self.started_at,
            "finished_at": self.finished_at,
            "duration_ms": self.duration().map(|d| d.as_secs_f64() * 1000.0),
            "error": self.error.as_ref().map(ToString::to_string),
            "steps": steps,
        })
    }
}

/// Accumulates step results while a run is in progress.
///
/// Consumed by [`finish`](Self::finish), which freezes it into a
/// [`RunResult`].
#[derive(Debug, Clone)]
pub struct RunRecorder {
    results: IndexMap<StepName, StepResult>,
    outputs: Outputs,
    started_at: DateTime<Utc>,
}

impl Default for RunRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRecorder {
    /// Starts recording a run now.
    pub fn new() -> Self {
        Self {
            results: IndexMap::new(),
            outputs: Outputs::new(),
            started_at: Utc::now(),
        }
    }

    /// Records a step result.
    ///
    /// Successful outputs are published for downstream steps; skipped and
    /// failed steps publish nothing.
    pub fn record(&mut self, result: StepResult) {
        if let (StepStatus::Success, Some(output)) = (result.status(), result.output()) {
            self.outputs.insert(result.name().clone(), output.clone());
        }
        self.results.insert(result.name().clone(), result);
    }

    /// Returns the outputs published so far.
    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Returns the result recorded for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&StepResult> {
        self.results.get(name)
    }

    /// Returns the number of recorded steps.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Freezes the recorded results, stamping the finish time.
    pub fn finish(self, error: Option<RunError>) -> RunResult {
        RunResult {
            results: self.results,
            started_at: Some(self.started_at),
            finished_at: Some(Utc::now()),
            error,
        }
    }
}
