//! Event trait and the stored event envelope.
//!
//! Events are immutable facts appended to an event log. Bodies are serialized
//! with `bincode`; the envelope keeps the type identifier, the logical
//! category and the optional effective ("as-of") timestamp outside the body so
//! projections can route and effective-date events without decoding them.
//!
//! # Example
//!
//! ```
//! use sagaflow_core::event::{Event, EventCategory, SerializedEvent};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
//! enum LeagueEvent {
//!     Formed { name: String },
//! }
//!
//! impl Event for LeagueEvent {
//!     fn event_type(&self) -> &'static str {
//!         "League.Formed.v1"
//!     }
//! }
//!
//! let stored = SerializedEvent::from_event(&LeagueEvent::Formed { name: "Acme".into() }, None).unwrap();
//! assert_eq!(stored.category, EventCategory::Domain);
//! let decoded: LeagueEvent = stored.decode().unwrap();
//! assert_eq!(decoded, LeagueEvent::Formed { name: "Acme".into() });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Logical category of an event log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Lifecycle event of a command instance.
    Command,
    /// Lifecycle event of a query instance.
    Query,
    /// Business event appended to an entity log.
    #[default]
    Domain,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Query => write!(f, "query"),
            Self::Domain => write!(f, "domain"),
        }
    }
}

/// An event that can be appended to an event log and replayed by projections.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier with a version suffix, such as
/// `"CommandCreated.v1"`. Projections dispatch on this identifier, so it must
/// never change for a given schema.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Logical category of the log this event belongs to.
    fn category(&self) -> EventCategory {
        EventCategory::Domain
    }

    /// Effective date of the fact, if it differs from the append time.
    fn as_of(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes do not decode
    /// into this event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event as stored in an event log.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., `"CommandCreated.v1"`).
    pub event_type: String,

    /// The bincode-serialized event body.
    pub data: Vec<u8>,

    /// Logical category copied from the event.
    pub category: EventCategory,

    /// Effective date copied from the event.
    pub as_of: Option<DateTime<Utc>>,

    /// Optional metadata (correlation identifiers and the like).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized domain event with no effective date.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            category: EventCategory::Domain,
            as_of: None,
            metadata,
        }
    }

    /// Create a serialized event from an `Event`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            category: event.category(),
            as_of: event.as_of(),
            metadata,
        })
    }

    /// Decode the body into a concrete event type.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the body does not decode.
    pub fn decode<E: Event + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_bytes(&self.data)
    }

    /// Whether this event is effective at `cutoff`.
    ///
    /// Events without an effective date are always effective.
    #[must_use]
    pub fn effective_at(&self, cutoff: DateTime<Utc>) -> bool {
        self.as_of.is_none_or(|as_of| as_of <= cutoff)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, category: {}, size: {} bytes }}",
            self.event_type,
            self.category,
            self.data.len()
        )
    }
}
