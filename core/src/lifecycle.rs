//! Lifecycle events appended to command and query logs.
//!
//! Opaque structured values (parameter values, projection snapshots, collated
//! results) travel as JSON text so event bodies stay bincode-encodable.

use crate::event::{Event, EventCategory};
use crate::ledger::ProjectionKey;
use crate::notification::{ImpactedEntity, NotificationKind, NotificationTarget, OutputTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type identifiers of [`CommandEvent`].
pub mod command_types {
    /// `CommandEvent::CommandCreated`
    pub const COMMAND_CREATED: &str = "CommandCreated.v1";
    /// `CommandEvent::ParameterValueSet`
    pub const PARAMETER_VALUE_SET: &str = "ParameterValueSet.v1";
    /// `CommandEvent::ValidationSucceeded`
    pub const VALIDATION_SUCCEEDED: &str = "ValidationSucceeded.v1";
    /// `CommandEvent::ValidationErrorOccured`
    pub const VALIDATION_ERROR_OCCURED: &str = "ValidationErrorOccured.v1";
    /// `CommandEvent::CommandStepCompleted`
    pub const COMMAND_STEP_COMPLETED: &str = "CommandStepCompleted.v1";
    /// `CommandEvent::CommandCompleted`
    pub const COMMAND_COMPLETED: &str = "CommandCompleted.v1";
    /// `CommandEvent::ReturnHookAdded`
    pub const RETURN_HOOK_ADDED: &str = "ReturnHookAdded.v1";
    /// `CommandEvent::NotificationsDispatched`
    pub const NOTIFICATIONS_DISPATCHED: &str = "NotificationsDispatched.v1";

    /// Every command event type.
    pub const ALL: [&str; 8] = [
        COMMAND_CREATED,
        PARAMETER_VALUE_SET,
        VALIDATION_SUCCEEDED,
        VALIDATION_ERROR_OCCURED,
        COMMAND_STEP_COMPLETED,
        COMMAND_COMPLETED,
        RETURN_HOOK_ADDED,
        NOTIFICATIONS_DISPATCHED,
    ];
}

/// Event type identifiers of [`QueryEvent`].
pub mod query_types {
    /// `QueryEvent::QueryCreated`
    pub const QUERY_CREATED: &str = "QueryCreated.v1";
    /// `QueryEvent::QueryParameterValueSet`
    pub const QUERY_PARAMETER_VALUE_SET: &str = "QueryParameterValueSet.v1";
    /// `QueryEvent::ValidationSucceeded`
    pub const VALIDATION_SUCCEEDED: &str = "QueryValidationSucceeded.v1";
    /// `QueryEvent::QueryParameterValidationErrorOccured`
    pub const PARAMETER_VALIDATION_ERROR_OCCURED: &str =
        "QueryParameterValidationErrorOccured.v1";
    /// `QueryEvent::ProjectionRequested`
    pub const PROJECTION_REQUESTED: &str = "ProjectionRequested.v1";
    /// `QueryEvent::ProjectionRunStarted`
    pub const PROJECTION_RUN_STARTED: &str = "ProjectionRunStarted.v1";
    /// `QueryEvent::ProjectionValueReturned`
    pub const PROJECTION_VALUE_RETURNED: &str = "ProjectionValueReturned.v1";
    /// `QueryEvent::QueryCompleted`
    pub const QUERY_COMPLETED: &str = "QueryCompleted.v1";
    /// `QueryEvent::OutputLocationSet`
    pub const OUTPUT_LOCATION_SET: &str = "OutputLocationSet.v1";
    /// `QueryEvent::OutputDispatched`
    pub const OUTPUT_DISPATCHED: &str = "OutputDispatched.v1";

    /// Every query event type.
    pub const ALL: [&str; 10] = [
        QUERY_CREATED,
        QUERY_PARAMETER_VALUE_SET,
        VALIDATION_SUCCEEDED,
        PARAMETER_VALIDATION_ERROR_OCCURED,
        PROJECTION_REQUESTED,
        PROJECTION_RUN_STARTED,
        PROJECTION_VALUE_RETURNED,
        QUERY_COMPLETED,
        OUTPUT_LOCATION_SET,
        OUTPUT_DISPATCHED,
    ];
}

/// Events of a command instance log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommandEvent {
    /// The command instance was created.
    CommandCreated {
        /// Command type name.
        command_name: String,
        /// Instance key (GUID).
        command_identifier: String,
        /// Correlation identifier shared with related operations.
        correlation_identifier: String,
        /// When the command was logged.
        logged_at: DateTime<Utc>,
    },
    /// One named parameter of the payload.
    ParameterValueSet {
        /// Parameter name.
        name: String,
        /// Parameter value as JSON text.
        value_json: String,
    },
    /// Validation passed.
    ValidationSucceeded {
        /// When validation completed.
        validated_at: DateTime<Utc>,
    },
    /// Validation failed.
    ValidationErrorOccured {
        /// Why validation failed.
        message: String,
        /// Fatal errors make the command `Invalid`.
        fatal: bool,
    },
    /// A business step finished.
    CommandStepCompleted {
        /// Step name.
        step_name: String,
        /// When the step was marked complete.
        logged_at: DateTime<Utc>,
        /// Entities the step affected.
        impacted_entities: Vec<ImpactedEntity>,
    },
    /// The command finished.
    CommandCompleted {
        /// When the command completed.
        completed_at: DateTime<Utc>,
        /// Free-text notes.
        notes: String,
    },
    /// A notification target was registered.
    ReturnHookAdded {
        /// The registration.
        target: NotificationTarget,
    },
    /// Notifications of one kind were fanned out.
    NotificationsDispatched {
        /// Signal that was sent.
        kind: NotificationKind,
        /// When the fan-out settled.
        dispatched_at: DateTime<Utc>,
    },
}

impl Event for CommandEvent {
    fn event_type(&self) -> &'static str {
        use command_types as t;
        match self {
            Self::CommandCreated { .. } => t::COMMAND_CREATED,
            Self::ParameterValueSet { .. } => t::PARAMETER_VALUE_SET,
            Self::ValidationSucceeded { .. } => t::VALIDATION_SUCCEEDED,
            Self::ValidationErrorOccured { .. } => t::VALIDATION_ERROR_OCCURED,
            Self::CommandStepCompleted { .. } => t::COMMAND_STEP_COMPLETED,
            Self::CommandCompleted { .. } => t::COMMAND_COMPLETED,
            Self::ReturnHookAdded { .. } => t::RETURN_HOOK_ADDED,
            Self::NotificationsDispatched { .. } => t::NOTIFICATIONS_DISPATCHED,
        }
    }

    fn category(&self) -> EventCategory {
        EventCategory::Command
    }
}

/// Events of a query instance log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QueryEvent {
    /// The query instance was created.
    QueryCreated {
        /// Query type name.
        query_name: String,
        /// Instance key (GUID).
        query_identifier: String,
        /// Correlation identifier shared with related operations.
        correlation_identifier: String,
        /// When the query was logged.
        logged_at: DateTime<Utc>,
    },
    /// One named parameter of the payload.
    QueryParameterValueSet {
        /// Parameter name.
        name: String,
        /// Parameter value as JSON text.
        value_json: String,
    },
    /// Validation passed.
    ValidationSucceeded {
        /// When validation completed.
        validated_at: DateTime<Utc>,
    },
    /// Validation failed.
    QueryParameterValidationErrorOccured {
        /// Why validation failed.
        message: String,
        /// Fatal errors make the query `Invalid`.
        fatal: bool,
    },
    /// A projection run was requested.
    ProjectionRequested {
        /// Which projection over which entity log.
        key: ProjectionKey,
        /// Effective date the projection is evaluated at.
        as_of: Option<DateTime<Utc>>,
        /// When the request was logged.
        requested_at: DateTime<Utc>,
    },
    /// A requested projection started running.
    ProjectionRunStarted {
        /// Which projection over which entity log.
        key: ProjectionKey,
        /// When the run started.
        started_at: DateTime<Utc>,
    },
    /// A projection run produced its snapshot.
    ProjectionValueReturned {
        /// Which projection over which entity log.
        key: ProjectionKey,
        /// Snapshot state as JSON text.
        value_json: String,
        /// Sequence number of the last event folded.
        sequence: u64,
        /// Whether any event altered the accumulator.
        changed: bool,
        /// When the value was recorded.
        returned_at: DateTime<Utc>,
    },
    /// The query result was collated.
    QueryCompleted {
        /// When the query completed.
        completed_at: DateTime<Utc>,
        /// Collated result as JSON text.
        result_json: String,
    },
    /// An output target was registered.
    OutputLocationSet {
        /// The registration.
        target: OutputTarget,
    },
    /// The collated result was sent to the output targets.
    OutputDispatched {
        /// Number of targets the result was sent to.
        targets: u32,
        /// When the dispatch settled.
        dispatched_at: DateTime<Utc>,
    },
}

impl Event for QueryEvent {
    fn event_type(&self) -> &'static str {
        use query_types as t;
        match self {
            Self::QueryCreated { .. } => t::QUERY_CREATED,
            Self::QueryParameterValueSet { .. } => t::QUERY_PARAMETER_VALUE_SET,
            Self::ValidationSucceeded { .. } => t::VALIDATION_SUCCEEDED,
            Self::QueryParameterValidationErrorOccured { .. } => {
                t::PARAMETER_VALIDATION_ERROR_OCCURED
            },
            Self::ProjectionRequested { .. } => t::PROJECTION_REQUESTED,
            Self::ProjectionRunStarted { .. } => t::PROJECTION_RUN_STARTED,
            Self::ProjectionValueReturned { .. } => t::PROJECTION_VALUE_RETURNED,
            Self::QueryCompleted { .. } => t::QUERY_COMPLETED,
            Self::OutputLocationSet { .. } => t::OUTPUT_LOCATION_SET,
            Self::OutputDispatched { .. } => t::OUTPUT_DISPATCHED,
        }
    }

    fn category(&self) -> EventCategory {
        EventCategory::Query
    }
}
