//! Client-side waiting on a query.
//!
//! The saga runs on its own Tokio task. The caller polls the query log until
//! the query completes, turns out invalid, or the wait times out; timing out
//! hands back a [`QueryHandle`] and never cancels the saga.

use crate::config::WaitOptions;
use crate::error::SagaError;
use crate::query_saga::{QueryHandler, QueryRun, QuerySaga};
use sagaflow_core::request::QueryRequest;
use sagaflow_core::status::OperationStatus;
use sagaflow_core::stream::OperationIdentity;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A query still running after the caller stopped waiting.
#[derive(Debug)]
pub struct QueryHandle {
    /// Identity of the query log, for later status checks.
    pub identity: OperationIdentity,
    task: JoinHandle<QueryRun>,
}

impl QueryHandle {
    /// Whether the saga task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the saga task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Step`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<QueryRun, SagaError> {
        self.task
            .await
            .map_err(|e| SagaError::step(format!("Query task failed: {e}")))
    }
}

/// How a wait ended.
#[derive(Debug)]
pub enum QueryWaitOutcome {
    /// The query completed with this result.
    Completed(serde_json::Value),
    /// The query failed validation.
    Invalid(String),
    /// The saga stopped short of completion, e.g. on a step failure.
    Stopped(QueryRun),
    /// The wait timed out; the saga keeps running.
    Running(QueryHandle),
}

/// Start `request` on a new task and wait for it within `options`.
///
/// # Errors
///
/// Returns [`SagaError`] if the query log cannot be read while polling, or if
/// the saga task panicked.
pub async fn spawn_and_wait<H>(
    saga: Arc<QuerySaga<H>>,
    request: QueryRequest,
    options: WaitOptions,
) -> Result<QueryWaitOutcome, SagaError>
where
    H: QueryHandler + 'static,
{
    let identity = saga.identity(request.query_unique_identifier.to_string());
    let runner = Arc::clone(&saga);
    let task = tokio::spawn(async move { runner.run(&request).await });
    let deadline = Instant::now() + options.timeout;

    loop {
        let summary = saga.status(&identity).await?;
        match summary.status {
            OperationStatus::Completed => {
                let value = summary.result()?.unwrap_or_default();
                return Ok(QueryWaitOutcome::Completed(value));
            },
            OperationStatus::Invalid => {
                let message = summary.validation_errors.last().cloned().unwrap_or_default();
                return Ok(QueryWaitOutcome::Invalid(message));
            },
            OperationStatus::Created | OperationStatus::Validated => {},
        }

        if task.is_finished() {
            // The log may have moved on between the read above and the task
            // finishing.
            let run = QueryHandle { identity, task }.join().await?;
            return Ok(match (run.status, run.value.clone()) {
                (Some(OperationStatus::Completed), Some(value)) => QueryWaitOutcome::Completed(value),
                (Some(OperationStatus::Invalid), _) => {
                    QueryWaitOutcome::Invalid(run.result.message.clone())
                },
                _ => QueryWaitOutcome::Stopped(run),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::info!(query = %identity, "Wait timed out; query keeps running");
            return Ok(QueryWaitOutcome::Running(QueryHandle { identity, task }));
        }
        tokio::time::sleep(options.poll_interval.min(deadline - now)).await;
    }
}
