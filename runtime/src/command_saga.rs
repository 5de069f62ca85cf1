//! Command saga coordinator.
//!
//! The coordinator holds no decision state of its own. Every step folds the
//! command log into a [`CommandSummary`] and acts only when the summary says
//! the step is still pending, so a run can be redriven after any crash:
//!
//! 1. create the log (`CommandCreated`, one `ReturnHookAdded` per target)
//! 2. log parameters
//! 3. validate
//! 4. guard on `Validated`, execute the handler, mark the step complete
//! 5. mark the command complete
//! 6. notify, recording each fan-out so a redrive sends only what is owed
//!
//! Nothing is compensated. A fatal failure stops the remaining critical-path
//! steps and leaves the log as it is.

use crate::config::CommandSagaConfig;
use crate::error::SagaError;
use crate::fanout::{FanOutReport, Notice, NotificationFanOut};
use crate::journal;
use crate::metrics::SagaMetrics;
use crate::step::{HandlerFuture, StepResult, Validation, invoke_step};
use crate::transport::TransportRegistry;
use sagaflow_core::environment::Clock;
use sagaflow_core::event_store::EventStore;
use sagaflow_core::lifecycle::CommandEvent;
use sagaflow_core::notification::{ImpactedEntity, NotificationKind, NotificationTarget};
use sagaflow_core::request::CommandRequest;
use sagaflow_core::status::OperationStatus;
use sagaflow_core::stream::OperationIdentity;
use sagaflow_core::summary::{CommandSummary, CommandSummaryProjection};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// What a handler sees when it is invoked.
#[derive(Clone)]
pub struct CommandContext {
    /// Identity of the command log.
    pub identity: OperationIdentity,
    /// Command state folded just before the invocation.
    pub summary: CommandSummary,
    /// Event store, for appending to entity logs.
    pub store: Arc<dyn EventStore>,
    /// Clock for event timestamps.
    pub clock: Arc<dyn Clock>,
}

impl CommandContext {
    /// Read a logged parameter.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Projection`] if the logged value does not decode.
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, SagaError> {
        Ok(self.summary.parameter(name)?)
    }

    /// Read a parameter that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] if the parameter was never logged.
    pub fn required_parameter<T: DeserializeOwned>(&self, name: &str) -> Result<T, SagaError> {
        self.parameter(name)?
            .ok_or_else(|| SagaError::structural(format!("Missing parameter {name}")))
    }
}

/// Domain logic of one command type.
///
/// Handlers read their inputs from the [`CommandContext`] summary, never from
/// the original request, so a redrive sees the same inputs as the first run.
pub trait CommandHandler: Send + Sync {
    /// Name recorded in `CommandStepCompleted`.
    fn step_name(&self) -> &str;

    /// Decide whether the command may proceed.
    fn validate<'a>(&'a self, context: &'a CommandContext) -> HandlerFuture<'a, Validation>;

    /// Perform the command, appending to entity logs.
    fn execute<'a>(&'a self, context: &'a CommandContext) -> HandlerFuture<'a, ()>;

    /// Entities the command affects, computed from its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] when a parameter needed to name an
    /// entity is missing.
    fn impacted_entities(&self, summary: &CommandSummary) -> Result<Vec<ImpactedEntity>, SagaError>;
}

impl<H: CommandHandler + ?Sized> CommandHandler for Arc<H> {
    fn step_name(&self) -> &str {
        (**self).step_name()
    }

    fn validate<'a>(&'a self, context: &'a CommandContext) -> HandlerFuture<'a, Validation> {
        (**self).validate(context)
    }

    fn execute<'a>(&'a self, context: &'a CommandContext) -> HandlerFuture<'a, ()> {
        (**self).execute(context)
    }

    fn impacted_entities(&self, summary: &CommandSummary) -> Result<Vec<ImpactedEntity>, SagaError> {
        (**self).impacted_entities(summary)
    }
}

/// Outcome of the execute step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The handler ran and the step was marked complete.
    Executed(Vec<ImpactedEntity>),
    /// The step was already marked complete; nothing ran.
    AlreadyCompleted,
    /// The command is not `Validated`; nothing ran.
    NotAllowed(OperationStatus),
}

/// Result of one coordinator run.
#[derive(Clone, Debug)]
pub struct CommandRun {
    /// Identity of the command log.
    pub identity: OperationIdentity,
    /// Status after the run; `None` if the log could not be read back.
    pub status: Option<OperationStatus>,
    /// Step response reported to the caller.
    pub result: StepResult,
    /// Every notification dispatched during the run.
    pub notifications: FanOutReport,
}

/// Drives command instances of one command type.
pub struct CommandSaga<H> {
    config: CommandSagaConfig,
    handler: H,
    store: Arc<dyn EventStore>,
    fanout: NotificationFanOut,
    clock: Arc<dyn Clock>,
}

impl<H: CommandHandler> CommandSaga<H> {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        config: CommandSagaConfig,
        handler: H,
        store: Arc<dyn EventStore>,
        transports: TransportRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fanout = NotificationFanOut::new(
            transports,
            config.notify_retry.clone(),
            config.dispatch_timeout,
        );
        Self {
            config,
            handler,
            store,
            fanout,
            clock,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CommandSagaConfig {
        &self.config
    }

    /// Identity of the command log keyed by `instance_key`.
    #[must_use]
    pub fn identity(&self, instance_key: impl Into<String>) -> OperationIdentity {
        OperationIdentity::new(
            self.config.domain_name.as_str(),
            self.config.command_name.as_str(),
            instance_key,
        )
    }

    /// Fold the command log.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] if the log cannot be loaded or folded.
    pub async fn status(&self, identity: &OperationIdentity) -> Result<CommandSummary, SagaError> {
        journal::project(self.store.as_ref(), identity, &CommandSummaryProjection).await
    }

    /// Create the command log and register notification targets.
    ///
    /// A second call for the same instance appends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] if the request names another command
    /// type, or a store error.
    pub async fn create(
        &self,
        request: &CommandRequest,
        hooks: &[NotificationTarget],
    ) -> Result<OperationIdentity, SagaError> {
        if request.command_name != self.config.command_name {
            return Err(SagaError::structural(format!(
                "Request for {} sent to {}",
                request.command_name, self.config.command_name
            )));
        }

        let key = request.command_unique_identifier.to_string();
        let identity = self.identity(key.as_str());
        self.store.create_if_not_exists(identity.stream_id()).await?;

        if self.status(&identity).await?.is_created() {
            tracing::debug!(command = %identity, "Command already created");
            return Ok(identity);
        }

        let mut events = vec![CommandEvent::CommandCreated {
            command_name: request.command_name.clone(),
            command_identifier: key.clone(),
            correlation_identifier: key,
            logged_at: self.clock.now(),
        }];
        events.extend(hooks.iter().map(|target| CommandEvent::ReturnHookAdded {
            target: target.clone(),
        }));
        journal::append(self.store.as_ref(), &identity, &events).await?;

        tracing::info!(command = %identity, hooks = hooks.len(), "Command created");
        Ok(identity)
    }

    /// Append one `ParameterValueSet` per named parameter.
    ///
    /// Returns the number of parameters logged; zero when they were already
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Structural`] if the payload is not an object.
    pub async fn log_parameters(
        &self,
        identity: &OperationIdentity,
        request: &CommandRequest,
    ) -> Result<usize, SagaError> {
        let pairs = request.parameter_pairs()?;
        if !self.status(identity).await?.parameters.is_empty() {
            tracing::debug!(command = %identity, "Parameters already logged");
            return Ok(0);
        }

        let events: Vec<_> = pairs
            .into_iter()
            .map(|(name, value_json)| CommandEvent::ParameterValueSet { name, value_json })
            .collect();
        journal::append(self.store.as_ref(), identity, &events).await?;
        Ok(events.len())
    }

    /// Run the validator and record its verdict.
    ///
    /// Skipped once the command has left `Created`. A fatal handler error is
    /// recorded as a fatal validation error. Returns the status afterwards.
    ///
    /// # Errors
    ///
    /// Returns a non-fatal handler error after retries, or a store error.
    pub async fn validate(&self, identity: &OperationIdentity) -> Result<OperationStatus, SagaError> {
        let context = self.context(identity).await?;
        if context.summary.status != OperationStatus::Created {
            tracing::debug!(command = %identity, status = %context.summary.status, "Validation skipped");
            return Ok(context.summary.status);
        }

        let handler = &self.handler;
        let context_ref = &context;
        let verdict = invoke_step("validate", &self.config.validate_retry, move || {
            handler.validate(context_ref)
        })
        .await;

        let event = match verdict {
            Ok(Validation::Valid) => CommandEvent::ValidationSucceeded {
                validated_at: self.clock.now(),
            },
            Ok(Validation::Invalid { message, fatal }) => {
                tracing::warn!(command = %identity, fatal, %message, "Validation failed");
                CommandEvent::ValidationErrorOccured { message, fatal }
            },
            Err(err) if err.is_fatal() => CommandEvent::ValidationErrorOccured {
                message: err.to_string(),
                fatal: true,
            },
            Err(err) => return Err(err),
        };
        journal::append(self.store.as_ref(), identity, &[event]).await?;

        Ok(self.status(identity).await?.status)
    }

    /// Guard on `Validated`, run the handler and mark its step complete.
    ///
    /// # Errors
    ///
    /// Returns the handler error, a structural error from
    /// [`CommandHandler::impacted_entities`], or a store error.
    pub async fn execute(&self, identity: &OperationIdentity) -> Result<ExecuteOutcome, SagaError> {
        let context = self.context(identity).await?;
        let status = context.summary.status;
        if !status.allows_processing() {
            tracing::warn!(command = %identity, %status, "Execute refused: command is not validated");
            return Ok(ExecuteOutcome::NotAllowed(status));
        }

        let step_name = self.handler.step_name();
        if context.summary.step_completed(step_name) {
            tracing::info!(command = %identity, step = step_name, "Step already completed");
            return Ok(ExecuteOutcome::AlreadyCompleted);
        }

        let handler = &self.handler;
        let context_ref = &context;
        invoke_step("execute", &self.config.execute_retry, move || {
            handler.execute(context_ref)
        })
        .await?;

        let entities = self.handler.impacted_entities(&context.summary)?;
        let event = CommandEvent::CommandStepCompleted {
            step_name: step_name.to_string(),
            logged_at: self.clock.now(),
            impacted_entities: entities.clone(),
        };
        journal::append(self.store.as_ref(), identity, &[event]).await?;

        tracing::info!(command = %identity, step = step_name, entities = entities.len(), "Step completed");
        Ok(ExecuteOutcome::Executed(entities))
    }

    /// Append `CommandCompleted` once the step is done.
    ///
    /// Returns whether this call completed the command.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn complete(&self, identity: &OperationIdentity) -> Result<bool, SagaError> {
        let summary = self.status(identity).await?;
        let step_name = self.handler.step_name();
        if !summary.status.allows_processing() || !summary.step_completed(step_name) {
            return Ok(false);
        }

        let event = CommandEvent::CommandCompleted {
            completed_at: self.clock.now(),
            notes: format!("{step_name} completed"),
        };
        journal::append(self.store.as_ref(), identity, &[event]).await?;
        tracing::info!(command = %identity, "Command completed");
        Ok(true)
    }

    /// Send a `kind` notification to every subscribed target.
    ///
    /// Error notifications are about the command itself; the others go out
    /// once per impacted entity. A log that cannot be read sends nothing.
    pub async fn notify(
        &self,
        identity: &OperationIdentity,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> FanOutReport {
        let summary = match self.status(identity).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(command = %identity, error = %err, "Notification skipped");
                return FanOutReport::default();
            },
        };

        let targets: Vec<NotificationTarget> = summary.targets_for(kind).cloned().collect();
        if targets.is_empty() {
            return FanOutReport::default();
        }

        let entities = match kind {
            NotificationKind::Error => vec![ImpactedEntity::new(
                identity.operation_type.as_str(),
                identity.instance_key.as_str(),
            )],
            NotificationKind::StepComplete | NotificationKind::CommandComplete => {
                summary.impacted_entities
            },
        };

        let notice = Notice {
            kind,
            operation: identity.clone(),
            message: message.into(),
            raised_at: self.clock.now(),
        };
        self.fanout.dispatch(&notice, &targets, &entities).await
    }

    /// Fan out `kind` unless the log records an earlier fan-out of it.
    ///
    /// A fan-out that reached at least one target is recorded with
    /// `NotificationsDispatched`. One that reached none, or a crash before
    /// the record, leaves it owed to the next run.
    ///
    /// # Errors
    ///
    /// Returns a store error; delivery failures are in the report.
    pub async fn notify_once(
        &self,
        identity: &OperationIdentity,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> Result<FanOutReport, SagaError> {
        if self.status(identity).await?.notified(kind) {
            tracing::debug!(command = %identity, %kind, "Notifications already sent");
            return Ok(FanOutReport::default());
        }

        let report = self.notify(identity, kind, message).await;
        if report.succeeded() > 0 {
            let event = CommandEvent::NotificationsDispatched {
                kind,
                dispatched_at: self.clock.now(),
            };
            journal::append(self.store.as_ref(), identity, &[event]).await?;
        }
        Ok(report)
    }

    /// Send the step and completion notifications the log says are owed.
    async fn deliver_pending(&self, identity: &OperationIdentity) -> Result<FanOutReport, SagaError> {
        let summary = self.status(identity).await?;
        let step_name = self.handler.step_name();
        let mut report = FanOutReport::default();

        if summary.step_completed(step_name) && !summary.notified(NotificationKind::StepComplete) {
            report.merge(
                self.notify_once(
                    identity,
                    NotificationKind::StepComplete,
                    format!("{step_name} completed"),
                )
                .await?,
            );
        }
        if summary.status == OperationStatus::Completed
            && !summary.notified(NotificationKind::CommandComplete)
        {
            report.merge(
                self.notify_once(
                    identity,
                    NotificationKind::CommandComplete,
                    format!("{} completed", self.config.command_name),
                )
                .await?,
            );
        }
        Ok(report)
    }

    /// Drive one command instance as far as it can go.
    ///
    /// Safe to call again for the same request: completed steps are skipped.
    pub async fn run(&self, request: &CommandRequest, hooks: &[NotificationTarget]) -> CommandRun {
        let identity = self.identity(request.command_unique_identifier.to_string());
        let span = tracing::info_span!(
            "command_saga",
            domain = %identity.domain,
            operation = %identity.operation_type,
            instance = %identity.instance_key,
        );

        let started = Instant::now();
        let run = self.drive(identity, request, hooks).instrument(span).await;
        SagaMetrics::record_run(
            &self.config.command_name,
            outcome_label(&run.result),
            started.elapsed(),
        );
        run
    }

    async fn drive(
        &self,
        identity: OperationIdentity,
        request: &CommandRequest,
        hooks: &[NotificationTarget],
    ) -> CommandRun {
        let mut notifications = FanOutReport::default();
        match self
            .critical_path(&identity, request, hooks, &mut notifications)
            .await
        {
            Ok((status, result)) => CommandRun {
                identity,
                status: Some(status),
                result,
                notifications,
            },
            Err(err) => {
                if err.is_fatal() {
                    tracing::error!(error = %err, "Command aborted");
                    notifications.merge(
                        self.notify(&identity, NotificationKind::Error, err.to_string())
                            .await,
                    );
                } else {
                    tracing::warn!(error = %err, "Command step failed; redrive to resume");
                }
                let status = self.status(&identity).await.ok().map(|s| s.status);
                CommandRun {
                    identity,
                    status,
                    result: StepResult::from(&err),
                    notifications,
                }
            },
        }
    }

    async fn critical_path(
        &self,
        identity: &OperationIdentity,
        request: &CommandRequest,
        hooks: &[NotificationTarget],
        notifications: &mut FanOutReport,
    ) -> Result<(OperationStatus, StepResult), SagaError> {
        self.create(request, hooks).await?;
        self.log_parameters(identity, request).await?;

        let status = self.validate(identity).await?;
        match status {
            OperationStatus::Validated => {},
            OperationStatus::Completed => {
                notifications.merge(self.deliver_pending(identity).await?);
                return Ok((status, StepResult::success("Command already completed")));
            },
            OperationStatus::Invalid => {
                let message = self.last_validation_error(identity).await?;
                notifications.merge(
                    self.notify_once(identity, NotificationKind::Error, message.as_str())
                        .await?,
                );
                return Ok((status, StepResult::fatal(message)));
            },
            OperationStatus::Created => {
                let message = self.last_validation_error(identity).await?;
                return Ok((status, StepResult::failure(message)));
            },
        }

        if let ExecuteOutcome::NotAllowed(status) = self.execute(identity).await? {
            return Ok((
                status,
                StepResult::failure(format!("Command is {status}; nothing executed")),
            ));
        }
        notifications.merge(self.deliver_pending(identity).await?);

        self.complete(identity).await?;
        notifications.merge(self.deliver_pending(identity).await?);

        let status = self.status(identity).await?.status;
        Ok((
            status,
            StepResult::success(format!("{} completed", self.config.command_name)),
        ))
    }

    async fn context(&self, identity: &OperationIdentity) -> Result<CommandContext, SagaError> {
        Ok(CommandContext {
            identity: identity.clone(),
            summary: self.status(identity).await?,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        })
    }

    async fn last_validation_error(&self, identity: &OperationIdentity) -> Result<String, SagaError> {
        Ok(self
            .status(identity)
            .await?
            .validation_errors
            .pop()
            .unwrap_or_else(|| "Validation failed".to_string()))
    }
}

pub(crate) const fn outcome_label(result: &StepResult) -> &'static str {
    if result.fatal_error {
        "fatal"
    } else if result.step_failure {
        "failed"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&StepResult::success("ok")), "ok");
        assert_eq!(outcome_label(&StepResult::failure("busy")), "failed");
        assert_eq!(outcome_label(&StepResult::fatal("bad")), "fatal");
    }
}
