//! Notification fan-out.
//!
//! One dispatch task per (target, impacted entity) pair, all run concurrently
//! behind a join-all barrier. A failing or hanging target never cancels its
//! siblings: each task carries its own retry policy and per-attempt timeout,
//! and the barrier only reports how many tasks failed.

use crate::metrics::NotificationMetrics;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::transport::{TransportError, TransportKind, TransportRegistry};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use sagaflow_core::notification::{
    ImpactedEntity, NotificationKind, NotificationTarget, OutputTarget,
};
use sagaflow_core::stream::OperationIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// What is being announced, independent of the recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Signal kind.
    pub kind: NotificationKind,
    /// Operation that raised the signal.
    pub operation: OperationIdentity,
    /// Human-readable detail.
    pub message: String,
    /// When the signal was raised.
    pub raised_at: DateTime<Utc>,
}

/// JSON body sent to every notification target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Signal kind.
    pub notification: NotificationKind,
    /// Numeric signal code.
    pub code: u8,
    /// Domain of the operation.
    pub domain: String,
    /// Command or query name.
    pub operation: String,
    /// Instance key of the operation.
    pub instance: String,
    /// Entity the notification is about.
    pub entity_type: String,
    /// Instance identifier of that entity.
    pub entity_id: String,
    /// Human-readable detail.
    pub message: String,
    /// When the signal was raised.
    pub raised_at: DateTime<Utc>,
}

impl NotificationPayload {
    /// Payload of `notice` about `entity`.
    #[must_use]
    pub fn new(notice: &Notice, entity: &ImpactedEntity) -> Self {
        Self {
            notification: notice.kind,
            code: notice.kind.code(),
            domain: notice.operation.domain.clone(),
            operation: notice.operation.operation_type.clone(),
            instance: notice.operation.instance_key.clone(),
            entity_type: entity.entity_type.clone(),
            entity_id: entity.instance_unique_identifier.clone(),
            message: notice.message.clone(),
            raised_at: notice.raised_at,
        }
    }
}

/// One dispatch task that failed after its retries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchFailure {
    /// Transport used.
    pub kind: TransportKind,
    /// Target address.
    pub address: String,
    /// Entity the payload was about, for notifications.
    pub entity: Option<ImpactedEntity>,
    /// Final error.
    pub error: TransportError,
}

/// Aggregate of a settled fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Dispatch tasks started.
    pub dispatched: usize,
    /// Tasks that failed.
    pub failures: Vec<DispatchFailure>,
}

impl FanOutReport {
    /// Number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Number of distinct targets with at least one failed task.
    #[must_use]
    pub fn failed_targets(&self) -> usize {
        self.failures
            .iter()
            .map(|f| (f.kind, f.address.as_str()))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Number of successful tasks.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.dispatched - self.failed()
    }

    /// Whether every task succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.dispatched += other.dispatched;
        self.failures.extend(other.failures);
    }
}

/// Concurrent delivery to notification and output targets.
#[derive(Clone, Debug)]
pub struct NotificationFanOut {
    transports: TransportRegistry,
    retry: RetryPolicy,
    dispatch_timeout: Duration,
}

impl NotificationFanOut {
    /// Fan-out over `transports` with a per-task policy and per-attempt timeout.
    #[must_use]
    pub const fn new(
        transports: TransportRegistry,
        retry: RetryPolicy,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            transports,
            retry,
            dispatch_timeout,
        }
    }

    /// Deliver one payload, retrying failed or timed-out attempts.
    ///
    /// # Errors
    ///
    /// Returns the final [`TransportError`]; a kind without a registered
    /// transport fails without retrying.
    pub async fn deliver(
        &self,
        kind: TransportKind,
        address: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        let transport = self
            .transports
            .get(kind)
            .ok_or(TransportError::NoTransport(kind))?;
        let timeout = self.dispatch_timeout;

        retry_with_backoff(&self.retry, || {
            let transport = transport.clone();
            async move {
                tokio::time::timeout(timeout, transport.send(address, payload))
                    .await
                    .map_err(|_| TransportError::Timeout(timeout))?
            }
        })
        .await
    }

    /// Send `notice` to every `(target, entity)` pair and wait for all tasks.
    ///
    /// `targets` must already be filtered by the notice kind. With no
    /// entities nothing is dispatched.
    pub async fn dispatch(
        &self,
        notice: &Notice,
        targets: &[NotificationTarget],
        entities: &[ImpactedEntity],
    ) -> FanOutReport {
        let started = Instant::now();
        let tasks: Vec<_> = targets
            .iter()
            .flat_map(|target| entities.iter().map(move |entity| (target, entity)))
            .map(|(target, entity)| async move {
                let kind = TransportKind::from(target.hook_type);
                let result = match serde_json::to_value(NotificationPayload::new(notice, entity)) {
                    Ok(payload) => self.deliver(kind, &target.hook_address, &payload).await,
                    Err(e) => Err(TransportError::Encoding(e.to_string())),
                };
                result.map_err(|error| DispatchFailure {
                    kind,
                    address: target.hook_address.clone(),
                    entity: Some(entity.clone()),
                    error,
                })
            })
            .collect();

        let report = settle(join_all(tasks).await);
        NotificationMetrics::record_fanout(report.dispatched, report.failed(), started.elapsed());
        log_report(&report, notice.kind.to_string().as_str());
        report
    }

    /// Send one payload to every output target and wait for all tasks.
    ///
    /// Targets whose kind has no transport (including `ReturnTarget::None`)
    /// are recorded as failures.
    pub async fn dispatch_outputs(
        &self,
        outputs: &[OutputTarget],
        payload: &serde_json::Value,
    ) -> FanOutReport {
        let started = Instant::now();
        let tasks: Vec<_> = outputs
            .iter()
            .map(|output| async move {
                let result = match TransportKind::for_return_target(output.target) {
                    Some(kind) => self
                        .deliver(kind, &output.location, payload)
                        .await
                        .map_err(|error| (kind, error)),
                    None => Err((
                        TransportKind::ResumeSignal,
                        TransportError::NoRecipient(output.location.clone()),
                    )),
                };
                result.map_err(|(kind, error)| DispatchFailure {
                    kind,
                    address: output.location.clone(),
                    entity: None,
                    error,
                })
            })
            .collect();

        let report = settle(join_all(tasks).await);
        NotificationMetrics::record_fanout(report.dispatched, report.failed(), started.elapsed());
        log_report(&report, "query-output");
        report
    }
}

fn settle(results: Vec<Result<(), DispatchFailure>>) -> FanOutReport {
    let dispatched = results.len();
    let failures = results.into_iter().filter_map(Result::err).collect();
    FanOutReport {
        dispatched,
        failures,
    }
}

fn log_report(report: &FanOutReport, signal: &str) {
    for failure in &report.failures {
        tracing::warn!(
            signal,
            transport = %failure.kind,
            address = %failure.address,
            error = %failure.error,
            "Dispatch failed"
        );
    }
    tracing::info!(
        signal,
        dispatched = report.dispatched,
        failed = report.failed(),
        failed_targets = report.failed_targets(),
        "Fan-out settled"
    );
}
