//! Summary projections over command and query logs.
//!
//! Coordinators re-derive every decision from these summaries: status,
//! logged parameters, notification or output targets and completed steps.

use crate::event::SerializedEvent;
use crate::lifecycle::{CommandEvent, QueryEvent, command_types, query_types};
use crate::notification::{ImpactedEntity, NotificationKind, NotificationTarget, OutputTarget};
use crate::projection::{Projection, ProjectionError, Result, decode_event};
use crate::status::{LifecycleSignal, OperationStatus};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read a logged parameter as `T`.
fn read_parameter<T: DeserializeOwned>(
    parameters: &BTreeMap<String, String>,
    name: &str,
) -> Result<Option<T>> {
    parameters
        .get(name)
        .map(|json| {
            serde_json::from_str(json).map_err(|e| {
                ProjectionError::Serialization(format!("parameter {name} does not decode: {e}"))
            })
        })
        .transpose()
}

/// State of a command instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    /// Lifecycle classification.
    pub status: OperationStatus,
    /// Command type name, once created.
    pub command_name: Option<String>,
    /// Instance key.
    pub command_identifier: Option<String>,
    /// Correlation identifier.
    pub correlation_identifier: Option<String>,
    /// Logged parameters as JSON text; a later value for a name wins.
    pub parameters: BTreeMap<String, String>,
    /// Registered notification targets.
    pub targets: Vec<NotificationTarget>,
    /// Completed step names, in completion order.
    pub completed_steps: Vec<String>,
    /// Impacted entities accumulated across steps, deduplicated.
    pub impacted_entities: Vec<ImpactedEntity>,
    /// Validation messages, fatal or not.
    pub validation_errors: Vec<String>,
    /// When the command completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Completion notes.
    pub notes: Option<String>,
    /// Notification kinds already fanned out.
    pub dispatched: Vec<NotificationKind>,
}

impl CommandSummary {
    /// Whether the log has a `CommandCreated` event.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.command_name.is_some()
    }

    /// Read a logged parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the logged JSON does not
    /// decode into `T`.
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        read_parameter(&self.parameters, name)
    }

    /// Targets subscribed to `kind`.
    pub fn targets_for(&self, kind: NotificationKind) -> impl Iterator<Item = &NotificationTarget> {
        self.targets.iter().filter(move |t| t.wants(kind))
    }

    /// Whether notifications of `kind` were already fanned out.
    #[must_use]
    pub fn notified(&self, kind: NotificationKind) -> bool {
        self.dispatched.contains(&kind)
    }

    /// Whether `step_name` has been marked complete.
    #[must_use]
    pub fn step_completed(&self, step_name: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_name)
    }
}

/// Folds a command log into its [`CommandSummary`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandSummaryProjection;

impl Projection for CommandSummaryProjection {
    type State = CommandSummary;

    fn name(&self) -> &str {
        "Command_Summary"
    }

    fn apply(&self, summary: &mut CommandSummary, event: &SerializedEvent) -> Result<bool> {
        if !command_types::ALL.contains(&event.event_type.as_str()) {
            return Ok(false);
        }

        match decode_event::<CommandEvent>(event)? {
            CommandEvent::CommandCreated {
                command_name,
                command_identifier,
                correlation_identifier,
                ..
            } => {
                summary.command_name = Some(command_name);
                summary.command_identifier = Some(command_identifier);
                summary.correlation_identifier = Some(correlation_identifier);
            },
            CommandEvent::ParameterValueSet { name, value_json } => {
                summary.parameters.insert(name, value_json);
            },
            CommandEvent::ValidationSucceeded { .. } => {
                summary.status = summary.status.apply(LifecycleSignal::ValidationSucceeded);
            },
            CommandEvent::ValidationErrorOccured { message, fatal } => {
                summary.validation_errors.push(message);
                summary.status = summary.status.apply(LifecycleSignal::ValidationFailed { fatal });
            },
            CommandEvent::CommandStepCompleted {
                step_name,
                impacted_entities,
                ..
            } => {
                if !summary.step_completed(&step_name) {
                    summary.completed_steps.push(step_name);
                }
                for entity in impacted_entities {
                    if !summary.impacted_entities.contains(&entity) {
                        summary.impacted_entities.push(entity);
                    }
                }
            },
            CommandEvent::CommandCompleted {
                completed_at,
                notes,
            } => {
                let before = summary.status;
                summary.status = summary.status.apply(LifecycleSignal::Completed);
                if summary.status == before {
                    return Ok(false);
                }
                summary.completed_at = Some(completed_at);
                summary.notes = Some(notes);
            },
            CommandEvent::ReturnHookAdded { target } => {
                if !summary.targets.contains(&target) {
                    summary.targets.push(target);
                }
            },
            CommandEvent::NotificationsDispatched { kind, .. } => {
                if summary.notified(kind) {
                    return Ok(false);
                }
                summary.dispatched.push(kind);
            },
        }
        Ok(true)
    }
}

/// State of a query instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    /// Lifecycle classification.
    pub status: OperationStatus,
    /// Query type name, once created.
    pub query_name: Option<String>,
    /// Instance key.
    pub query_identifier: Option<String>,
    /// Correlation identifier.
    pub correlation_identifier: Option<String>,
    /// Logged parameters as JSON text; a later value for a name wins.
    pub parameters: BTreeMap<String, String>,
    /// Registered output targets.
    pub outputs: Vec<OutputTarget>,
    /// Validation messages, fatal or not.
    pub validation_errors: Vec<String>,
    /// Collated result as JSON text, once completed.
    pub result_json: Option<String>,
    /// When the query completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the result was sent to the output targets.
    pub output_dispatched_at: Option<DateTime<Utc>>,
}

impl QuerySummary {
    /// Whether the log has a `QueryCreated` event.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.query_name.is_some()
    }

    /// Read a logged parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the logged JSON does not
    /// decode into `T`.
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        read_parameter(&self.parameters, name)
    }

    /// The collated result, once completed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the recorded result is
    /// not JSON.
    pub fn result(&self) -> Result<Option<serde_json::Value>> {
        self.result_json
            .as_deref()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| ProjectionError::Serialization(e.to_string()))
            })
            .transpose()
    }
}

/// Folds a query log into its [`QuerySummary`].
#[derive(Clone, Copy, Debug, Default)]
pub struct QuerySummaryProjection;

impl Projection for QuerySummaryProjection {
    type State = QuerySummary;

    fn name(&self) -> &str {
        "Query_Summary"
    }

    fn apply(&self, summary: &mut QuerySummary, event: &SerializedEvent) -> Result<bool> {
        if !query_types::ALL.contains(&event.event_type.as_str()) {
            return Ok(false);
        }

        match decode_event::<QueryEvent>(event)? {
            QueryEvent::QueryCreated {
                query_name,
                query_identifier,
                correlation_identifier,
                ..
            } => {
                summary.query_name = Some(query_name);
                summary.query_identifier = Some(query_identifier);
                summary.correlation_identifier = Some(correlation_identifier);
            },
            QueryEvent::QueryParameterValueSet { name, value_json } => {
                summary.parameters.insert(name, value_json);
            },
            QueryEvent::ValidationSucceeded { .. } => {
                summary.status = summary.status.apply(LifecycleSignal::ValidationSucceeded);
            },
            QueryEvent::QueryParameterValidationErrorOccured { message, fatal } => {
                summary.validation_errors.push(message);
                summary.status = summary.status.apply(LifecycleSignal::ValidationFailed { fatal });
            },
            QueryEvent::QueryCompleted {
                completed_at,
                result_json,
            } => {
                let before = summary.status;
                summary.status = summary.status.apply(LifecycleSignal::Completed);
                if summary.status == before {
                    return Ok(false);
                }
                summary.completed_at = Some(completed_at);
                summary.result_json = Some(result_json);
            },
            QueryEvent::OutputLocationSet { target } => {
                if !summary.outputs.contains(&target) {
                    summary.outputs.push(target);
                }
            },
            QueryEvent::OutputDispatched { dispatched_at, .. } => {
                if summary.output_dispatched_at.is_some() {
                    return Ok(false);
                }
                summary.output_dispatched_at = Some(dispatched_at);
            },
            QueryEvent::ProjectionRequested { .. }
            | QueryEvent::ProjectionRunStarted { .. }
            | QueryEvent::ProjectionValueReturned { .. } => return Ok(false),
        }
        Ok(true)
    }
}
