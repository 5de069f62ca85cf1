//! Event log collaborator trait.
//!
//! The event log is the sole source of truth: each operation instance and each
//! domain entity owns one append-only, ordered log. The storage engine itself
//! lives outside this crate; coordinators only depend on the four operations
//! of [`EventStore`].
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `sagaflow-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use sagaflow_core::event_store::{EventStore, EventStoreError};
//! use sagaflow_core::stream::StreamId;
//! use sagaflow_core::event::SerializedEvent;
//!
//! async fn example<E: EventStore>(store: &E, events: Vec<SerializedEvent>) -> Result<(), EventStoreError> {
//!     let stream_id = StreamId::new("leagues/league/Acme FC");
//!     store.create_if_not_exists(stream_id.clone()).await?;
//!     let version = store.append_events(stream_id.clone(), None, events).await?;
//!     let all_events = store.load_events(stream_id, None).await?;
//!     assert_eq!(all_events.len() as u64, version.value());
//!     Ok(())
//! }
//! ```

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event log operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: expected version doesn't match current version.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version we expected the stream to be at.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// Append to a log that has not been created.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Storage backend error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Boxed future returned by [`EventStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventStoreError>> + Send + 'a>>;

/// Append-only event log storage.
///
/// # Ordering
///
/// Within one log, appends are strictly ordered and the version increases by
/// one per event. Readers always observe a consistent prefix. There are no
/// cross-log transactions.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so coordinators can hold an
/// `Arc<dyn EventStore>` shared by every step and transport.
pub trait EventStore: Send + Sync {
    /// Append events to an existing log.
    ///
    /// `expected_version` enables optimistic concurrency:
    /// - `Some(version)`: the log must currently be at this version
    /// - `None`: append unconditionally
    ///
    /// Returns the version after the append.
    ///
    /// # Errors
    ///
    /// - `StreamNotFound`: the log was never created
    /// - `ConcurrencyConflict`: version mismatch
    /// - `DatabaseError`: storage failure
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> StoreFuture<'_, Version>;

    /// Load events from a log, oldest first.
    ///
    /// `from_version` selects events with a sequence number greater than the
    /// given version; `None` loads the whole log. A missing log loads as an
    /// empty vector.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: storage failure
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> StoreFuture<'_, Vec<SerializedEvent>>;

    /// Whether the log has been created.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: storage failure
    fn exists(&self, stream_id: StreamId) -> StoreFuture<'_, bool>;

    /// Create the log if it does not exist.
    ///
    /// Returns `true` when this call created the log.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: storage failure
    fn create_if_not_exists(&self, stream_id: StreamId) -> StoreFuture<'_, bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("leagues/league/Acme"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("leagues/league/Acme"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn stream_not_found_error_display() {
        let error = EventStoreError::StreamNotFound(StreamId::new("missing-stream"));
        assert!(format!("{error}").contains("missing-stream"));
    }
}
