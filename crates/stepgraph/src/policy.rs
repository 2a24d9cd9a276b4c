//! The attempt loop shared by every executor: condition, timeout and retry.

use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use stepgraph_core::{BoxError, RunError, Step, StepInput, StepResult, TaskError, Value};
use tokio::task::JoinError;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Runs one step to completion under its policy.
///
/// A failing task never escapes as an error here: it ends up in a failed
/// [`StepResult`]. Only a failing condition or retry predicate returns
/// `Err`, which the executors treat as fatal to the whole run. A panicking
/// predicate counts as a failing one.
pub(crate) async fn run_step(step: &Step, input: StepInput) -> Result<StepResult, RunError> {
    let started_at = Utc::now();

    let should_run = guarded(|| step.should_run(&input))
        .map_err(|e| RunError::condition(step.name().clone(), e))?;
    if !should_run {
        debug!("Step '{}' skipped by its condition", step.name());
        return Ok(StepResult::skipped(step.name().clone(), started_at));
    }

    let policy = step.config().retry;
    let clock = Instant::now();
    let mut retries = 0u32;
    let mut remaining = policy.max_retries;

    loop {
        let error = match attempt(step, input.clone()).await {
            Ok(output) => {
                info!("Step '{}' completed successfully", step.name());
                return Ok(StepResult::success(
                    step.name().clone(),
                    output,
                    clock.elapsed(),
                    started_at,
                    retries,
                ));
            }
            Err(error) => error,
        };

        let retry = remaining > 0
            && guarded(|| step.accepts_retry(&error))
                .map_err(|e| RunError::retry_predicate(step.name().clone(), e))?;
        if !retry {
            warn!(
                "Step '{}' failed after {} retries: {}",
                step.name(),
                retries,
                error
            );
            return Ok(StepResult::failure(
                step.name().clone(),
                error,
                clock.elapsed(),
                started_at,
                retries,
            ));
        }

        remaining -= 1;
        retries += 1;
        let delay = policy.delay_for_retry(retries);
        let reason = if error.is_timed_out() {
            "timed out"
        } else {
            "failed"
        };
        info!(
            "Step '{}' {}, retrying ({}/{}) after {:?}",
            step.name(),
            reason,
            retries,
            policy.max_retries,
            delay
        );
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

/// Runs the task once on its own tokio task.
///
/// With a timeout, the attempt races a timer. Losing the race reports
/// [`TaskError::TimedOut`] but does not abort the task: it keeps running in
/// the background until it finishes on its own.
async fn attempt(step: &Step, input: StepInput) -> Result<Value, TaskError> {
    let task = Arc::clone(step.task());
    let handle = tokio::spawn(async move { task.run(input).await });

    let joined = match step.timeout() {
        Some(bound) => match timeout(bound, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(TaskError::TimedOut {
                    step_name: step.name().clone(),
                    timeout: bound,
                })
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result.map_err(TaskError::from),
        Err(join_error) => Err(TaskError::Panicked {
            step_name: step.name().clone(),
            details: panic_details(join_error),
        }),
    }
}

/// Calls a user predicate, turning a panic into an error.
fn guarded<T>(predicate: impl FnOnce() -> Result<T, BoxError>) -> Result<T, BoxError> {
    panic::catch_unwind(AssertUnwindSafe(predicate)).unwrap_or_else(|payload| {
        Err(format!("predicate panicked: {}", panic_message(payload.as_ref())).into())
    })
}

fn panic_details(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    panic_message(error.into_panic().as_ref())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
