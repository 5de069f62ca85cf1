//! Query saga coordinator.
//!
//! A query collects one or more projection snapshots of entity logs and
//! collates them into a result. Progress is tracked in the projection request
//! ledger, a projection over the query's own log, so every step can be
//! re-entered:
//!
//! 1. create the log (`QueryCreated`, `OutputLocationSet`)
//! 2. log parameters
//! 3. validate
//! 4. guard on `Validated`, request projections once
//! 5. run every unprocessed projection concurrently
//! 6. collate when nothing is outstanding
//! 7. dispatch the result to every output target

use crate::command_saga::outcome_label;
use crate::config::QuerySagaConfig;
use crate::error::SagaError;
use crate::fanout::{FanOutReport, NotificationFanOut};
use crate::journal;
use crate::metrics::{ProjectionMetrics, SagaMetrics};
use crate::step::{HandlerFuture, StepResult, Validation, invoke_step};
use crate::transport::TransportRegistry;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use sagaflow_core::environment::Clock;
use sagaflow_core::event_store::EventStore;
use sagaflow_core::ledger::{
    LedgerEntry, ProjectionKey, ProjectionLedger, ProjectionLedgerProjection, RequestStatus,
};
use sagaflow_core::lifecycle::QueryEvent;
use sagaflow_core::projection::{ProjectionError, ProjectionRegistry, ProjectionValue};
use sagaflow_core::request::QueryRequest;
use sagaflow_core::status::OperationStatus;
use sagaflow_core::stream::OperationIdentity;
use sagaflow_core::summary::{QuerySummary, QuerySummaryProjection};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Projection values recorded in the ledger, in request order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessedProjections {
    values: Vec<(ProjectionKey, ProjectionValue)>,
}

impl ProcessedProjections {
    /// Collect every processed entry of `ledger`.
    #[must_use]
    pub fn from_ledger(ledger: &ProjectionLedger) -> Self {
        let values = ledger
            .processed()
            .filter_map(|entry| entry.value.clone().map(|value| (entry.key.clone(), value)))
            .collect();
        Self { values }
    }

    /// First value of the projection named `name`, decoded into its state.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Projection`] if the value does not decode into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, SagaError> {
        self.values
            .iter()
            .find(|(key, _)| key.projection_type_name == name)
            .map(|(_, value)| value.decode::<T>())
            .transpose()
            .map_err(SagaError::from)
    }

    /// Value recorded for exactly `key`.
    #[must_use]
    pub fn get_for(&self, key: &ProjectionKey) -> Option<&ProjectionValue> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ProjectionKey, &ProjectionValue)> {
        self.values.iter().map(|(key, value)| (key, value))
    }
}

/// Domain logic of one query type.
pub trait QueryHandler: Send + Sync {
    /// Decide whether the query may proceed.
    fn validate<'a>(&'a self, summary: &'a QuerySummary) -> HandlerFuture<'a, Validation>;

    /// Projections the result is built from.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] when a parameter naming an entity is
    /// missing.
    fn required_projections(&self, summary: &QuerySummary) -> Result<Vec<ProjectionKey>, SagaError>;

    /// Build the result from the processed projections.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] when a projection value does not decode.
    fn collate(
        &self,
        summary: &QuerySummary,
        projections: &ProcessedProjections,
    ) -> Result<serde_json::Value, SagaError>;
}

impl<H: QueryHandler + ?Sized> QueryHandler for Arc<H> {
    fn validate<'a>(&'a self, summary: &'a QuerySummary) -> HandlerFuture<'a, Validation> {
        (**self).validate(summary)
    }

    fn required_projections(&self, summary: &QuerySummary) -> Result<Vec<ProjectionKey>, SagaError> {
        (**self).required_projections(summary)
    }

    fn collate(
        &self,
        summary: &QuerySummary,
        projections: &ProcessedProjections,
    ) -> Result<serde_json::Value, SagaError> {
        (**self).collate(summary, projections)
    }
}

/// Result of one coordinator run.
#[derive(Clone, Debug)]
pub struct QueryRun {
    /// Identity of the query log.
    pub identity: OperationIdentity,
    /// Status after the run; `None` if the log could not be read back.
    pub status: Option<OperationStatus>,
    /// Step response reported to the caller.
    pub result: StepResult,
    /// Collated value, once completed.
    pub value: Option<serde_json::Value>,
    /// Output deliveries.
    pub outputs: FanOutReport,
}

/// Drives query instances of one query type.
pub struct QuerySaga<H> {
    config: QuerySagaConfig,
    handler: H,
    store: Arc<dyn EventStore>,
    registry: ProjectionRegistry,
    fanout: NotificationFanOut,
    clock: Arc<dyn Clock>,
}

impl<H: QueryHandler> QuerySaga<H> {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        config: QuerySagaConfig,
        handler: H,
        store: Arc<dyn EventStore>,
        registry: ProjectionRegistry,
        transports: TransportRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fanout = NotificationFanOut::new(
            transports,
            config.output_retry.clone(),
            config.dispatch_timeout,
        );
        Self {
            config,
            handler,
            store,
            registry,
            fanout,
            clock,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &QuerySagaConfig {
        &self.config
    }

    /// Identity of the query log keyed by `instance_key`.
    #[must_use]
    pub fn identity(&self, instance_key: impl Into<String>) -> OperationIdentity {
        OperationIdentity::new(
            self.config.domain_name.as_str(),
            self.config.query_name.as_str(),
            instance_key,
        )
    }

    /// Fold the query log into its summary.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] if the log cannot be loaded or folded.
    pub async fn status(&self, identity: &OperationIdentity) -> Result<QuerySummary, SagaError> {
        journal::project(self.store.as_ref(), identity, &QuerySummaryProjection).await
    }

    /// Fold the query log into its projection request ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] if the log cannot be loaded or folded.
    pub async fn ledger(&self, identity: &OperationIdentity) -> Result<ProjectionLedger, SagaError> {
        journal::project(self.store.as_ref(), identity, &ProjectionLedgerProjection).await
    }

    /// Create the query log and register its output target.
    ///
    /// A second call for the same instance appends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] if the request names another query
    /// type, or a store error.
    pub async fn create(&self, request: &QueryRequest) -> Result<OperationIdentity, SagaError> {
        if request.query_name != self.config.query_name {
            return Err(SagaError::structural(format!(
                "Request for {} sent to {}",
                request.query_name, self.config.query_name
            )));
        }

        let key = request.query_unique_identifier.to_string();
        let identity = self.identity(key.as_str());
        self.store.create_if_not_exists(identity.stream_id()).await?;

        if self.status(&identity).await?.is_created() {
            tracing::debug!(query = %identity, "Query already created");
            return Ok(identity);
        }

        let mut events = vec![QueryEvent::QueryCreated {
            query_name: request.query_name.clone(),
            query_identifier: key.clone(),
            correlation_identifier: key,
            logged_at: self.clock.now(),
        }];
        if let Some(target) = request.output_target() {
            events.push(QueryEvent::OutputLocationSet { target });
        }
        journal::append(self.store.as_ref(), &identity, &events).await?;

        tracing::info!(query = %identity, "Query created");
        Ok(identity)
    }

    /// Append one `QueryParameterValueSet` per named parameter.
    ///
    /// Returns the number logged; zero when already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] if the payload is not an object.
    pub async fn log_parameters(
        &self,
        identity: &OperationIdentity,
        request: &QueryRequest,
    ) -> Result<usize, SagaError> {
        let pairs = request.parameter_pairs()?;
        if !self.status(identity).await?.parameters.is_empty() {
            tracing::debug!(query = %identity, "Parameters already logged");
            return Ok(0);
        }

        let events: Vec<_> = pairs
            .into_iter()
            .map(|(name, value_json)| QueryEvent::QueryParameterValueSet { name, value_json })
            .collect();
        journal::append(self.store.as_ref(), identity, &events).await?;
        Ok(events.len())
    }

    /// Run the validator and record its verdict; returns the status
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns a non-fatal handler error after retries, or a store error.
    pub async fn validate(&self, identity: &OperationIdentity) -> Result<OperationStatus, SagaError> {
        let summary = self.status(identity).await?;
        if summary.status != OperationStatus::Created {
            return Ok(summary.status);
        }

        let handler = &self.handler;
        let summary_ref = &summary;
        let verdict = invoke_step("validate", &self.config.validate_retry, move || {
            handler.validate(summary_ref)
        })
        .await;

        let event = match verdict {
            Ok(Validation::Valid) => QueryEvent::ValidationSucceeded {
                validated_at: self.clock.now(),
            },
            Ok(Validation::Invalid { message, fatal }) => {
                tracing::warn!(query = %identity, fatal, %message, "Validation failed");
                QueryEvent::QueryParameterValidationErrorOccured { message, fatal }
            },
            Err(err) if err.is_fatal() => QueryEvent::QueryParameterValidationErrorOccured {
                message: err.to_string(),
                fatal: true,
            },
            Err(err) => return Err(err),
        };
        journal::append(self.store.as_ref(), identity, &[event]).await?;

        Ok(self.status(identity).await?.status)
    }

    /// Append one `ProjectionRequested` per projection the result needs.
    ///
    /// A no-op when the ledger already has entries or the query is not
    /// `Validated`. Returns the number requested.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] if the handler requires nothing,
    /// [`SagaError::Projection`] if a projection is not registered, or a
    /// store error.
    pub async fn request_projections(
        &self,
        identity: &OperationIdentity,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<usize, SagaError> {
        let summary = self.status(identity).await?;
        if !summary.status.allows_processing() {
            tracing::warn!(query = %identity, status = %summary.status, "Projection request refused");
            return Ok(0);
        }

        if !self.ledger(identity).await?.is_empty() {
            tracing::info!(query = %identity, "Projections already requested or processed");
            return Ok(0);
        }

        let mut keys = self.handler.required_projections(&summary)?;
        keys.sort();
        keys.dedup();
        if keys.is_empty() {
            return Err(SagaError::structural(format!(
                "{} requires no projections",
                self.config.query_name
            )));
        }
        if let Some(missing) = keys
            .iter()
            .find(|key| !self.registry.contains(&key.projection_type_name))
        {
            return Err(ProjectionError::NotRegistered(missing.projection_type_name.clone()).into());
        }

        let requested_at = self.clock.now();
        let events: Vec<_> = keys
            .into_iter()
            .map(|key| QueryEvent::ProjectionRequested {
                key,
                as_of,
                requested_at,
            })
            .collect();
        journal::append(self.store.as_ref(), identity, &events).await?;

        tracing::info!(query = %identity, count = events.len(), "Projections requested");
        Ok(events.len())
    }

    /// Run every unresolved ledger entry concurrently.
    ///
    /// Entries left `InProgress` by an interrupted run are run again; a
    /// second value for a key is ignored by the ledger. Returns the number of
    /// projections processed.
    ///
    /// Concurrent calls for the same query are not serialized: both may run
    /// the same entry, and only the first `ProjectionProcessed` recorded for a
    /// key counts.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error if any run failed fatally, otherwise the
    /// first failure. Runs that succeeded stay recorded either way.
    pub async fn run_unprocessed_projections(
        &self,
        identity: &OperationIdentity,
    ) -> Result<usize, SagaError> {
        let pending: Vec<LedgerEntry> = self.ledger(identity).await?.unprocessed().cloned().collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let results = join_all(
            pending
                .iter()
                .map(|entry| self.run_projection(identity, entry)),
        )
        .await;

        let processed = results.iter().filter(|r| r.is_ok()).count();
        let mut errors: Vec<SagaError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            return Ok(processed);
        }

        tracing::warn!(query = %identity, processed, failed = errors.len(), "Projection runs failed");
        let first = errors
            .iter()
            .position(SagaError::is_fatal)
            .unwrap_or_default();
        Err(errors.swap_remove(first))
    }

    async fn run_projection(
        &self,
        identity: &OperationIdentity,
        entry: &LedgerEntry,
    ) -> Result<(), SagaError> {
        let key = &entry.key;
        if entry.status == RequestStatus::Requested {
            let event = QueryEvent::ProjectionRunStarted {
                key: key.clone(),
                started_at: self.clock.now(),
            };
            journal::append(self.store.as_ref(), identity, &[event]).await?;
        }

        let projection = self.registry.create(&key.projection_type_name)?;
        let projection = projection.as_ref();
        let store = self.store.as_ref();
        let entity = &key.entity;
        let as_of = entry.as_of;

        let started = Instant::now();
        let value = invoke_step("run-projection", &self.config.projection_retry, move || async move {
            let events = journal::load(store, entity).await?;
            Ok::<_, SagaError>(projection.fold_value(&events, as_of)?)
        })
        .await
        .inspect_err(|_| ProjectionMetrics::record_failure(&key.projection_type_name))?;
        ProjectionMetrics::record_run(&key.projection_type_name, started.elapsed());

        let value_json = serde_json::to_string(&value.value)
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        let event = QueryEvent::ProjectionValueReturned {
            key: key.clone(),
            value_json,
            sequence: value.sequence.value(),
            changed: value.changed,
            returned_at: self.clock.now(),
        };
        journal::append(self.store.as_ref(), identity, &[event]).await?;

        tracing::debug!(query = %identity, projection = %key, sequence = %value.sequence, "Projection processed");
        Ok(())
    }

    /// Build and record the result once every projection is processed.
    ///
    /// Returns `None` while projections are outstanding or the query is not
    /// `Validated`; a completed query returns its recorded result.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or a store error.
    pub async fn collate(
        &self,
        identity: &OperationIdentity,
    ) -> Result<Option<serde_json::Value>, SagaError> {
        let summary = self.status(identity).await?;
        match summary.status {
            OperationStatus::Completed => return Ok(summary.result()?),
            OperationStatus::Validated => {},
            status => {
                tracing::warn!(query = %identity, %status, "Collation refused");
                return Ok(None);
            },
        }

        let ledger = self.ledger(identity).await?;
        if ledger.unprocessed_count() > 0 || ledger.processed_count() == 0 {
            tracing::info!(
                query = %identity,
                unprocessed = ledger.unprocessed_count(),
                processed = ledger.processed_count(),
                "Projections outstanding; collation deferred"
            );
            return Ok(None);
        }

        let value = self
            .handler
            .collate(&summary, &ProcessedProjections::from_ledger(&ledger))?;
        let event = QueryEvent::QueryCompleted {
            completed_at: self.clock.now(),
            result_json: value.to_string(),
        };
        journal::append(self.store.as_ref(), identity, &[event]).await?;

        tracing::info!(query = %identity, "Query completed");
        Ok(Some(value))
    }

    /// Send the recorded result to every output target.
    ///
    /// Skipped with a warning while projections are outstanding, before the
    /// query completes, or when no target is registered. A send that reached
    /// any target is recorded with `OutputDispatched` and not repeated.
    ///
    /// # Errors
    ///
    /// Returns a store error; delivery failures are in the report.
    pub async fn output(&self, identity: &OperationIdentity) -> Result<FanOutReport, SagaError> {
        if self.ledger(identity).await?.unprocessed_count() > 0 {
            tracing::warn!(query = %identity, "Output skipped: projections outstanding");
            return Ok(FanOutReport::default());
        }

        let summary = self.status(identity).await?;
        let Some(value) = summary.result()? else {
            tracing::warn!(query = %identity, status = %summary.status, "Output skipped: query not completed");
            return Ok(FanOutReport::default());
        };
        if summary.outputs.is_empty() {
            tracing::warn!(query = %identity, "No output targets");
            return Ok(FanOutReport::default());
        }
        if summary.output_dispatched_at.is_some() {
            tracing::debug!(query = %identity, "Output already sent");
            return Ok(FanOutReport::default());
        }

        let report = self.fanout.dispatch_outputs(&summary.outputs, &value).await;
        tracing::info!(query = %identity, sent = report.succeeded(), "Output sent");
        if report.succeeded() > 0 {
            let event = QueryEvent::OutputDispatched {
                targets: u32::try_from(report.succeeded()).unwrap_or(u32::MAX),
                dispatched_at: self.clock.now(),
            };
            journal::append(self.store.as_ref(), identity, &[event]).await?;
        }
        Ok(report)
    }

    /// Drive one query instance as far as it can go.
    ///
    /// Safe to call again for the same request: completed steps are skipped.
    pub async fn run(&self, request: &QueryRequest) -> QueryRun {
        let identity = self.identity(request.query_unique_identifier.to_string());
        let span = tracing::info_span!(
            "query_saga",
            domain = %identity.domain,
            operation = %identity.operation_type,
            instance = %identity.instance_key,
        );

        let started = Instant::now();
        let run = self.drive(identity, request).instrument(span).await;
        SagaMetrics::record_run(
            &self.config.query_name,
            outcome_label(&run.result),
            started.elapsed(),
        );
        run
    }

    async fn drive(&self, identity: OperationIdentity, request: &QueryRequest) -> QueryRun {
        let mut outputs = FanOutReport::default();
        match self.critical_path(&identity, request, &mut outputs).await {
            Ok((status, result, value)) => QueryRun {
                identity,
                status: Some(status),
                result,
                value,
                outputs,
            },
            Err(err) => {
                if err.is_fatal() {
                    tracing::error!(error = %err, "Query aborted");
                } else {
                    tracing::warn!(error = %err, "Query step failed; redrive to resume");
                }
                let status = self.status(&identity).await.ok().map(|s| s.status);
                QueryRun {
                    identity,
                    status,
                    result: StepResult::from(&err),
                    value: None,
                    outputs,
                }
            },
        }
    }

    async fn critical_path(
        &self,
        identity: &OperationIdentity,
        request: &QueryRequest,
        outputs: &mut FanOutReport,
    ) -> Result<(OperationStatus, StepResult, Option<serde_json::Value>), SagaError> {
        self.create(request).await?;
        self.log_parameters(identity, request).await?;

        let status = self.validate(identity).await?;
        match status {
            OperationStatus::Validated => {},
            OperationStatus::Completed => {
                outputs.merge(self.output(identity).await?);
                let value = self.status(identity).await?.result()?;
                return Ok((status, StepResult::success("Query already completed"), value));
            },
            OperationStatus::Invalid | OperationStatus::Created => {
                let message = self
                    .status(identity)
                    .await?
                    .validation_errors
                    .pop()
                    .unwrap_or_else(|| "Validation failed".to_string());
                let result = if status == OperationStatus::Invalid {
                    StepResult::fatal(message)
                } else {
                    StepResult::failure(message)
                };
                return Ok((status, result, None));
            },
        }

        self.request_projections(identity, request.as_of).await?;
        self.run_unprocessed_projections(identity).await?;

        let Some(value) = self.collate(identity).await? else {
            return Ok((
                status,
                StepResult::failure("Projections outstanding; redrive to collate"),
                None,
            ));
        };

        outputs.merge(self.output(identity).await?);
        let message = if self.status(identity).await?.outputs.is_empty() {
            format!("{} completed; no output targets", self.config.query_name)
        } else {
            format!("{} completed", self.config.query_name)
        };
        Ok((OperationStatus::Completed, StepResult::success(message), Some(value)))
    }
}
