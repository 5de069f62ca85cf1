//! # Sagaflow Core
//!
//! Types and pure logic for event-sourced command and query sagas.
//!
//! Every command instance, query instance and domain entity owns one
//! append-only event log. Everything a coordinator needs to decide its next
//! step is re-derived by folding that log through a projection, so a
//! coordinator can be resumed at any point after a crash or redeployment.
//!
//! ## Modules
//!
//! - [`stream`]: log addressing (`OperationIdentity`, `StreamId`, `Version`)
//! - [`event`]: the `Event` trait and the stored envelope
//! - [`event_store`]: the event log collaborator
//! - [`event_bus`]: the topic publish/subscribe collaborator
//! - [`projection`]: the fold engine and the projection registry
//! - [`status`]: the lifecycle state machine
//! - [`lifecycle`]: command and query lifecycle events
//! - [`summary`]: command and query summary projections
//! - [`ledger`]: the projection request ledger of a query
//! - [`notification`]: notification and output target registrations
//! - [`request`]: command and query requests
//! - [`environment`]: injected clock

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod ledger;
pub mod lifecycle;
pub mod notification;
pub mod projection;
pub mod request;
pub mod status;
pub mod stream;
pub mod summary;

/// Injected dependencies shared by coordinators.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability.
    ///
    /// Every timestamp a coordinator writes into an event comes from the
    /// injected clock, so tests can pin it.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use environment::{Clock, SystemClock};
pub use event::{Event, EventCategory, SerializedEvent};
pub use event_store::{EventStore, EventStoreError};
pub use projection::{Projection, ProjectionRegistry, ProjectionValue};
pub use status::OperationStatus;
pub use stream::{OperationIdentity, StreamId, Version};
