//! Saga error taxonomy.
//!
//! Every failure a coordinator sees is classified as either fatal (abort the
//! remaining critical-path steps) or a step failure (record, log, allow a
//! redrive). Nothing is rolled back either way; appended events stay.

use crate::transport::TransportError;
use sagaflow_core::event::EventError;
use sagaflow_core::event_store::EventStoreError;
use sagaflow_core::projection::ProjectionError;
use sagaflow_core::request::ParameterShapeError;
use thiserror::Error;

/// Errors raised while driving a saga.
#[derive(Error, Debug)]
pub enum SagaError {
    /// The event log failed.
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// An event could not be encoded.
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// A fold failed closed.
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Input to a step is missing or unparseable.
    #[error("Structural error: {0}")]
    Structural(String),

    /// A handler signalled that the operation cannot succeed.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// A handler failed in a way a retry or redrive may fix.
    #[error("Step failed: {0}")]
    Step(String),

    /// A delivery failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SagaError {
    /// Structural error from any message.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    /// Fatal error from any message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Step failure from any message.
    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }

    /// Whether this error aborts the remaining critical-path steps.
    ///
    /// Storage and delivery failures and explicit step failures are
    /// retryable; fold, encoding and structural failures are not.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Event(_) | Self::Projection(_) | Self::Structural(_) | Self::Fatal(_)
        )
    }
}

impl From<ParameterShapeError> for SagaError {
    fn from(err: ParameterShapeError) -> Self {
        Self::Structural(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow_core::stream::StreamId;

    #[test]
    fn classification() {
        assert!(SagaError::structural("missing LeagueName").is_fatal());
        assert!(SagaError::fatal("league already exists").is_fatal());
        assert!(SagaError::from(ProjectionError::InvalidEvent("x".into())).is_fatal());
        assert!(!SagaError::step("entity log busy").is_fatal());
        assert!(!SagaError::from(EventStoreError::StreamNotFound(StreamId::new("a/b/c"))).is_fatal());
    }

    #[test]
    fn parameter_shape_is_structural() {
        let err = SagaError::from(ParameterShapeError { found: "array" });
        assert!(matches!(err, SagaError::Structural(_)));
        assert!(err.is_fatal());
    }
}
