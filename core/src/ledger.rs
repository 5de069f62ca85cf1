//! Projection request ledger of a query instance.
//!
//! The ledger is a projection over the query's own log. Each distinct
//! [`ProjectionKey`] moves `Requested → InProgress → Processed` at most once
//! per resolution; a key cannot be requested again while an unresolved entry
//! for it exists.

use crate::event::SerializedEvent;
use crate::lifecycle::{QueryEvent, query_types};
use crate::projection::{Projection, ProjectionError, ProjectionValue, Result, decode_event};
use crate::stream::{OperationIdentity, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which projection to run over which entity log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectionKey {
    /// Registered projection name.
    pub projection_type_name: String,
    /// Entity log the projection folds.
    pub entity: OperationIdentity,
}

impl ProjectionKey {
    /// Create a new key.
    #[must_use]
    pub fn new(projection_type_name: impl Into<String>, entity: OperationIdentity) -> Self {
        Self {
            projection_type_name: projection_type_name.into(),
            entity,
        }
    }
}

impl fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.projection_type_name, self.entity)
    }
}

/// Progress of one projection request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Logged, not yet started.
    Requested,
    /// Started, no value recorded yet.
    InProgress,
    /// Value recorded.
    Processed,
}

impl RequestStatus {
    /// `Requested` and `InProgress` are unresolved.
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        !matches!(self, Self::Processed)
    }
}

/// One ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Projection and target log.
    pub key: ProjectionKey,
    /// Effective date requested.
    pub as_of: Option<DateTime<Utc>>,
    /// Progress.
    pub status: RequestStatus,
    /// Recorded value, once processed.
    pub value: Option<ProjectionValue>,
}

/// Folded ledger state, entries in request order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionLedger {
    entries: Vec<LedgerEntry>,
}

impl ProjectionLedger {
    /// All entries in request order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// No projection has ever been requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries waiting to start.
    pub fn requested(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.with_status(RequestStatus::Requested)
    }

    /// Entries started but not returned.
    pub fn in_progress(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.with_status(RequestStatus::InProgress)
    }

    /// Entries with a recorded value.
    pub fn processed(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.with_status(RequestStatus::Processed)
    }

    /// Entries not yet processed (`Requested` or `InProgress`).
    pub fn unprocessed(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| e.status.is_unresolved())
    }

    /// Number of `Requested` or `InProgress` entries.
    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed().count()
    }

    /// Number of `Processed` entries.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed().count()
    }

    /// Whether `key` has an unresolved entry.
    #[must_use]
    pub fn contains_unresolved(&self, key: &ProjectionKey) -> bool {
        self.entries
            .iter()
            .any(|e| &e.key == key && e.status.is_unresolved())
    }

    /// Whether `key` was ever requested.
    #[must_use]
    pub fn contains(&self, key: &ProjectionKey) -> bool {
        self.entries.iter().any(|e| &e.key == key)
    }

    fn with_status(&self, status: RequestStatus) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(move |e| e.status == status)
    }

    fn latest_mut(&mut self, key: &ProjectionKey) -> Option<&mut LedgerEntry> {
        self.entries.iter_mut().rev().find(|e| &e.key == key)
    }
}

/// Folds a query log into its [`ProjectionLedger`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectionLedgerProjection;

impl Projection for ProjectionLedgerProjection {
    type State = ProjectionLedger;

    fn name(&self) -> &str {
        "Projection_Request_Ledger"
    }

    fn apply(&self, ledger: &mut ProjectionLedger, event: &SerializedEvent) -> Result<bool> {
        match event.event_type.as_str() {
            query_types::PROJECTION_REQUESTED
            | query_types::PROJECTION_RUN_STARTED
            | query_types::PROJECTION_VALUE_RETURNED => {},
            _ => return Ok(false),
        }

        match decode_event::<QueryEvent>(event)? {
            QueryEvent::ProjectionRequested { key, as_of, .. } => {
                if ledger.contains_unresolved(&key) {
                    return Ok(false);
                }
                ledger.entries.push(LedgerEntry {
                    key,
                    as_of,
                    status: RequestStatus::Requested,
                    value: None,
                });
                Ok(true)
            },
            QueryEvent::ProjectionRunStarted { key, .. } => match ledger.latest_mut(&key) {
                Some(entry) if entry.status == RequestStatus::Requested => {
                    entry.status = RequestStatus::InProgress;
                    Ok(true)
                },
                _ => Ok(false),
            },
            QueryEvent::ProjectionValueReturned {
                key,
                value_json,
                sequence,
                changed,
                ..
            } => {
                let value = serde_json::from_str(&value_json).map_err(|e| {
                    ProjectionError::InvalidEvent(format!("value of {key} is not JSON: {e}"))
                })?;
                match ledger.latest_mut(&key) {
                    Some(entry) if entry.status.is_unresolved() => {
                        entry.value = Some(ProjectionValue {
                            projection_name: key.projection_type_name.clone(),
                            value,
                            sequence: Version::new(sequence),
                            changed,
                        });
                        entry.status = RequestStatus::Processed;
                        Ok(true)
                    },
                    _ => Ok(false),
                }
            },
            other => Err(ProjectionError::InvalidEvent(format!(
                "{} routed as ledger event",
                crate::event::Event::event_type(&other)
            ))),
        }
    }
}
