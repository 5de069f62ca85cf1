//! Event log access shared by coordinators and handlers.

use crate::error::SagaError;
use crate::metrics::EventStoreMetrics;
use sagaflow_core::event::{Event, SerializedEvent};
use sagaflow_core::event_store::EventStore;
use sagaflow_core::projection::{Projection, fold};
use sagaflow_core::stream::{OperationIdentity, Version};
use serde::Serialize;

/// Append `events` to the log of `identity`, in order.
///
/// An empty slice appends nothing and returns `None`.
///
/// # Errors
///
/// Returns [`SagaError::Event`] if an event does not encode and
/// [`SagaError::Store`] if the append fails.
pub async fn append<E: Event + Serialize>(
    store: &dyn EventStore,
    identity: &OperationIdentity,
    events: &[E],
) -> Result<Option<Version>, SagaError> {
    if events.is_empty() {
        return Ok(None);
    }

    let serialized = events
        .iter()
        .map(|event| SerializedEvent::from_event(event, None))
        .collect::<Result<Vec<_>, _>>()?;

    let version = store
        .append_events(identity.stream_id(), None, serialized)
        .await?;
    EventStoreMetrics::record_append(events.len());
    tracing::debug!(stream = %identity, version = %version, count = events.len(), "Appended events");
    Ok(Some(version))
}

/// Load the whole log of `identity`.
///
/// # Errors
///
/// Returns [`SagaError::Store`] if the load fails.
pub async fn load(
    store: &dyn EventStore,
    identity: &OperationIdentity,
) -> Result<Vec<SerializedEvent>, SagaError> {
    let events = store.load_events(identity.stream_id(), None).await?;
    EventStoreMetrics::record_load(events.len());
    Ok(events)
}

/// Fold the log of `identity` through `projection`.
///
/// # Errors
///
/// Returns [`SagaError::Store`] if the load fails and
/// [`SagaError::Projection`] if the fold fails.
pub async fn project<P: Projection>(
    store: &dyn EventStore,
    identity: &OperationIdentity,
    projection: &P,
) -> Result<P::State, SagaError> {
    let events = load(store, identity).await?;
    Ok(fold(projection, &events)?.state)
}
