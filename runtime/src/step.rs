//! Step invocation and step results.
//!
//! Each externally-invoked unit of work (validate, execute, run a projection)
//! goes through [`invoke_step`], which applies the step's retry policy to the
//! invocation only. Fatal errors are never retried.

use crate::error::SagaError;
use crate::metrics::SagaMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by domain handlers.
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SagaError>> + Send + 'a>>;

/// Verdict of a domain validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    /// The operation may proceed.
    Valid,
    /// The operation failed validation.
    Invalid {
        /// Why.
        message: String,
        /// Fatal failures make the operation `Invalid`; others leave it
        /// `Created` for a redrive.
        fatal: bool,
    },
}

impl Validation {
    /// Fatal validation failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            fatal: true,
        }
    }

    /// Non-fatal validation failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            fatal: false,
        }
    }
}

/// Response of a step, as reported to callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Human-readable outcome.
    pub message: String,
    /// The saga aborted its remaining critical-path steps.
    pub fatal_error: bool,
    /// The step failed after exhausting retries; a redrive may succeed.
    pub step_failure: bool,
}

impl StepResult {
    /// A successful step.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal_error: false,
            step_failure: false,
        }
    }

    /// A retryable failure.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal_error: false,
            step_failure: true,
        }
    }

    /// A fatal failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal_error: true,
            step_failure: false,
        }
    }

    /// Neither flag set.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.fatal_error && !self.step_failure
    }
}

impl From<&SagaError> for StepResult {
    fn from(err: &SagaError) -> Self {
        if err.is_fatal() {
            Self::fatal(err.to_string())
        } else {
            Self::failure(err.to_string())
        }
    }
}

/// Invoke one step under `policy`.
///
/// Non-fatal errors are retried until the policy is exhausted; a fatal error
/// returns immediately.
///
/// # Errors
///
/// Returns the fatal error, or the last error once attempts run out.
pub async fn invoke_step<F, Fut, T>(
    step: &'static str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, SagaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SagaError>>,
{
    tracing::debug!(step, max_attempts = policy.max_attempts(), "Invoking step");
    let result = retry_with_predicate(policy, operation, |err: &SagaError| !err.is_fatal()).await;

    match &result {
        Ok(_) => SagaMetrics::record_step(step, "ok"),
        Err(err) if err.is_fatal() => {
            SagaMetrics::record_step(step, "fatal");
            tracing::error!(step, error = %err, "Step failed fatally");
        },
        Err(err) => {
            SagaMetrics::record_step(step, "failed");
            tracing::warn!(step, error = %err, "Step failed after retries");
        },
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn step_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = invoke_step("execute", &policy(3), || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SagaError::step("busy"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert!(matches!(result, Ok("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), SagaError> = invoke_step("validate", &policy(5), || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SagaError::structural("no payload"))
            }
        })
        .await;

        let err = result.err();
        assert!(matches!(err, Some(SagaError::Structural(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn step_result_from_error() {
        assert!(StepResult::from(&SagaError::fatal("x")).fatal_error);
        let failure = StepResult::from(&SagaError::step("y"));
        assert!(failure.step_failure);
        assert!(!failure.is_success());
        assert!(StepResult::success("ok").is_success());
    }
}
