//! Prometheus metrics for saga coordination.
//!
//! Components record through the recorder structs below. Without an
//! installed recorder every call is a no-op, so tests need no setup.
//!
//! # Example
//!
//! ```rust,no_run
//! use sagaflow_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder holder.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// A recorder installed earlier in the process is kept; this call then
    /// only logs a warning.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` unless this server installed the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("saga_runs_total", "Saga runs by operation and outcome");
    describe_histogram!("saga_run_duration_seconds", "Time taken by one saga run");
    describe_counter!("saga_steps_total", "Saga steps by step name and outcome");

    describe_counter!("notification_dispatches_total", "Notification dispatch tasks started");
    describe_counter!("notification_failures_total", "Notification dispatch tasks that failed");
    describe_histogram!(
        "notification_fanout_duration_seconds",
        "Time until every dispatch task of a fan-out settled"
    );

    describe_counter!("projection_runs_total", "Projection folds executed for queries");
    describe_counter!("projection_failures_total", "Projection folds that failed");
    describe_histogram!("projection_run_duration_seconds", "Time taken to fold a projection");

    describe_counter!("event_store_events_appended_total", "Events appended by coordinators");
    describe_counter!("event_store_events_loaded_total", "Events loaded by coordinators");

    describe_counter!("retry_attempts_total", "Retries scheduled after a failed attempt");
    describe_counter!("retry_successes_total", "Operations that succeeded after a retry");
    describe_counter!("retry_exhausted_total", "Operations that ran out of attempts");
}

/// Saga metrics recorder.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record one saga run.
    pub fn record_run(operation: &str, outcome: &'static str, duration: Duration) {
        counter!("saga_runs_total", "operation" => operation.to_string(), "outcome" => outcome)
            .increment(1);
        histogram!("saga_run_duration_seconds", "operation" => operation.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record one step outcome.
    pub fn record_step(step: &'static str, outcome: &'static str) {
        counter!("saga_steps_total", "step" => step, "outcome" => outcome).increment(1);
    }
}

/// Notification fan-out metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a settled fan-out.
    pub fn record_fanout(dispatched: usize, failed: usize, duration: Duration) {
        counter!("notification_dispatches_total").increment(dispatched as u64);
        counter!("notification_failures_total").increment(failed as u64);
        histogram!("notification_fanout_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Projection run metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record a successful fold.
    pub fn record_run(projection: &str, duration: Duration) {
        counter!("projection_runs_total", "projection" => projection.to_string()).increment(1);
        histogram!("projection_run_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed fold.
    pub fn record_failure(projection: &str) {
        counter!("projection_failures_total", "projection" => projection.to_string())
            .increment(1);
    }
}

/// Event store metrics recorder.
pub struct EventStoreMetrics;

impl EventStoreMetrics {
    /// Record an append.
    pub fn record_append(count: usize) {
        counter!("event_store_events_appended_total").increment(count as u64);
    }

    /// Record a load.
    pub fn record_load(count: usize) {
        counter!("event_store_events_loaded_total").increment(count as u64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a scheduled retry.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a success after at least one retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted attempts.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
