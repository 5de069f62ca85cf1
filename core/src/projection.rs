//! Projection engine: deterministic left-folds over an event log.
//!
//! A projection turns the ordered events of one log into a typed snapshot.
//! Folding is pure: the same event sequence always yields the same snapshot,
//! sequence number and `changed` flag, so coordinators can re-derive every
//! decision from the log on each resumption.
//!
//! # Rules
//!
//! - Events are applied strictly in log order.
//! - Event types a projection does not handle are ignored, so projections
//!   tolerate event types added after they were written.
//! - A handled event that fails to decode or apply stops the fold with an
//!   error. Business state is never computed from a partial view.
//!
//! # Example
//!
//! ```
//! use sagaflow_core::event::{Event, SerializedEvent};
//! use sagaflow_core::projection::{decode_event, fold, Projection, Result};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Scored { points: u32 }
//!
//! impl Event for Scored {
//!     fn event_type(&self) -> &'static str { "Scored.v1" }
//! }
//!
//! #[derive(Default)]
//! struct TotalPoints;
//!
//! impl Projection for TotalPoints {
//!     type State = u32;
//!
//!     fn name(&self) -> &str { "Total_Points" }
//!
//!     fn apply(&self, state: &mut u32, event: &SerializedEvent) -> Result<bool> {
//!         if event.event_type != "Scored.v1" {
//!             return Ok(false);
//!         }
//!         let scored: Scored = decode_event(event)?;
//!         *state += scored.points;
//!         Ok(true)
//!     }
//! }
//!
//! let events = vec![
//!     SerializedEvent::from_event(&Scored { points: 3 }, None).unwrap(),
//!     SerializedEvent::from_event(&Scored { points: 1 }, None).unwrap(),
//! ];
//! let snapshot = fold(&TotalPoints, &events).unwrap();
//! assert_eq!(snapshot.state, 4);
//! assert_eq!(snapshot.sequence.value(), 2);
//! assert!(snapshot.changed);
//! ```

use crate::event::{Event, SerializedEvent};
use crate::stream::Version;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// A handled event body could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A handled event was decoded but is not valid for the current state.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The fold stopped at a specific event.
    #[error("Projection '{projection}' failed at event {position} ({event_type}): {reason}")]
    EventProcessing {
        /// Projection name.
        projection: String,
        /// 1-based position of the failing event in the log.
        position: u64,
        /// Type identifier of the failing event.
        event_type: String,
        /// Underlying failure.
        reason: String,
    },

    /// Snapshot could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No factory registered under this name.
    #[error("Projection not registered: {0}")]
    NotRegistered(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Decode a stored event inside a projection handler.
///
/// # Errors
///
/// Returns [`ProjectionError::Deserialization`] if the body does not decode.
pub fn decode_event<E: Event + DeserializeOwned>(event: &SerializedEvent) -> Result<E> {
    event
        .decode()
        .map_err(|e| ProjectionError::Deserialization(e.to_string()))
}

/// A deterministic fold of an event log into a read-model.
pub trait Projection: Send + Sync {
    /// The accumulator. `Default` is the state of an empty log.
    type State: Clone + Default + Send;

    /// Projection name, unique across the registry.
    fn name(&self) -> &str;

    /// Apply one event to the accumulator.
    ///
    /// Returns `Ok(true)` when the event changed the accumulator and
    /// `Ok(false)` when it was ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] when a handled event cannot be applied.
    fn apply(&self, state: &mut Self::State, event: &SerializedEvent) -> Result<bool>;
}

/// Output of a fold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectionSnapshot<S> {
    /// Final accumulator.
    pub state: S,
    /// Sequence number of the last event folded.
    pub sequence: Version,
    /// Whether any event altered the accumulator.
    pub changed: bool,
}

/// Fold a whole event sequence.
///
/// # Errors
///
/// Returns [`ProjectionError::EventProcessing`] at the first event that fails.
pub fn fold<P: Projection + ?Sized>(
    projection: &P,
    events: &[SerializedEvent],
) -> Result<ProjectionSnapshot<P::State>> {
    fold_as_of(projection, events, None)
}

/// Fold the events effective at `as_of`.
///
/// Events whose effective date is later than the cutoff are skipped; events
/// without an effective date always apply. With `None` every event applies.
///
/// # Errors
///
/// Returns [`ProjectionError::EventProcessing`] at the first event that fails.
pub fn fold_as_of<P: Projection + ?Sized>(
    projection: &P,
    events: &[SerializedEvent],
    as_of: Option<DateTime<Utc>>,
) -> Result<ProjectionSnapshot<P::State>> {
    let mut state = P::State::default();
    let mut sequence = Version::INITIAL;
    let mut changed = false;

    for (index, event) in events.iter().enumerate() {
        if let Some(cutoff) = as_of {
            if !event.effective_at(cutoff) {
                continue;
            }
        }

        let position = index as u64 + 1;
        let applied = projection.apply(&mut state, event).map_err(|err| {
            ProjectionError::EventProcessing {
                projection: Projection::name(projection).to_string(),
                position,
                event_type: event.event_type.clone(),
                reason: err.to_string(),
            }
        })?;

        changed |= applied;
        sequence = Version::new(position);
    }

    Ok(ProjectionSnapshot {
        state,
        sequence,
        changed,
    })
}

/// Type-erased projection result, as recorded in a query's log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionValue {
    /// Name of the projection that produced the value.
    pub projection_name: String,
    /// Snapshot state as JSON.
    pub value: serde_json::Value,
    /// Sequence number of the last event folded.
    pub sequence: Version,
    /// Whether any event altered the accumulator.
    pub changed: bool,
}

impl ProjectionValue {
    /// Decode the snapshot into the projection's typed state.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] when the JSON does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| ProjectionError::Serialization(e.to_string()))
    }
}

/// Object-safe view of a projection whose state serializes to JSON.
///
/// Blanket-implemented for every [`Projection`] with a `Serialize` state, so
/// the registry can hold heterogeneous projections.
pub trait DynProjection: Send + Sync {
    /// Projection name.
    fn name(&self) -> &str;

    /// Fold events effective at `as_of` into a [`ProjectionValue`].
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the fold fails or the state cannot be
    /// serialized.
    fn fold_value(
        &self,
        events: &[SerializedEvent],
        as_of: Option<DateTime<Utc>>,
    ) -> Result<ProjectionValue>;
}

impl<P> DynProjection for P
where
    P: Projection,
    P::State: Serialize,
{
    fn name(&self) -> &str {
        Projection::name(self)
    }

    fn fold_value(
        &self,
        events: &[SerializedEvent],
        as_of: Option<DateTime<Utc>>,
    ) -> Result<ProjectionValue> {
        let snapshot = fold_as_of(self, events, as_of)?;
        let value = serde_json::to_value(&snapshot.state)
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        Ok(ProjectionValue {
            projection_name: Projection::name(self).to_string(),
            value,
            sequence: snapshot.sequence,
            changed: snapshot.changed,
        })
    }
}

type ProjectionFactory = Arc<dyn Fn() -> Box<dyn DynProjection> + Send + Sync>;

/// Name → factory map of the projections a process can run.
///
/// Populated explicitly at startup; nothing is discovered at runtime.
///
/// ```
/// # use sagaflow_core::projection::{Projection, ProjectionRegistry, Result};
/// # use sagaflow_core::event::SerializedEvent;
/// # #[derive(Default)]
/// # struct Count;
/// # impl Projection for Count {
/// #     type State = u64;
/// #     fn name(&self) -> &str { "Event_Count" }
/// #     fn apply(&self, state: &mut u64, _: &SerializedEvent) -> Result<bool> { *state += 1; Ok(true) }
/// # }
/// let registry = ProjectionRegistry::new().register::<Count>();
/// assert!(registry.contains("Event_Count"));
/// assert!(registry.create("Unknown").is_err());
/// ```
#[derive(Clone, Default)]
pub struct ProjectionRegistry {
    factories: HashMap<String, ProjectionFactory>,
}

impl ProjectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projection under its own name.
    #[must_use]
    pub fn register<P>(self) -> Self
    where
        P: Projection + Default + 'static,
        P::State: Serialize,
    {
        let name = Projection::name(&P::default()).to_string();
        self.register_with(name, || Box::new(P::default()))
    }

    /// Register a factory under an explicit name.
    #[must_use]
    pub fn register_with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DynProjection> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Whether a projection is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the projection registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::NotRegistered`] for unknown names.
    pub fn create(&self, name: &str) -> Result<Box<dyn DynProjection>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ProjectionError::NotRegistered(name.to_string()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ProjectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionRegistry")
            .field("projections", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Deposited {
        amount: u64,
        effective: Option<DateTime<Utc>>,
    }

    impl Event for Deposited {
        fn event_type(&self) -> &'static str {
            "Deposited.v1"
        }

        fn as_of(&self) -> Option<DateTime<Utc>> {
            self.effective
        }
    }

    #[derive(Default)]
    struct Balance;

    impl Projection for Balance {
        type State = u64;

        fn name(&self) -> &str {
            "Balance"
        }

        fn apply(&self, state: &mut u64, event: &SerializedEvent) -> Result<bool> {
            match event.event_type.as_str() {
                "Deposited.v1" => {
                    let deposited: Deposited = decode_event(event)?;
                    *state += deposited.amount;
                    Ok(deposited.amount > 0)
                },
                _ => Ok(false),
            }
        }
    }

    fn deposit(amount: u64) -> SerializedEvent {
        SerializedEvent::from_event(
            &Deposited {
                amount,
                effective: None,
            },
            None,
        )
        .expect("serializes")
    }

    #[test]
    fn empty_log_folds_to_default_unchanged() {
        let snapshot = fold(&Balance, &[]).expect("fold succeeds");
        assert_eq!(snapshot.state, 0);
        assert_eq!(snapshot.sequence, Version::INITIAL);
        assert!(!snapshot.changed);
    }

    #[test]
    fn unhandled_event_types_are_ignored_but_counted() {
        let events = vec![
            deposit(5),
            SerializedEvent::new("SomethingNewer.v3".to_string(), vec![1, 2, 3], None),
        ];

        let snapshot = fold(&Balance, &events).expect("fold succeeds");
        assert_eq!(snapshot.state, 5);
        assert_eq!(snapshot.sequence, Version::new(2));
    }

    #[test]
    fn only_unhandled_events_leave_changed_false() {
        let events = vec![SerializedEvent::new("Other.v1".to_string(), vec![], None)];
        let snapshot = fold(&Balance, &events).expect("fold succeeds");
        assert!(!snapshot.changed);
        assert_eq!(snapshot.sequence, Version::new(1));
    }

    #[test]
    fn corrupt_handled_event_fails_closed() {
        let events = vec![
            deposit(5),
            SerializedEvent::new("Deposited.v1".to_string(), vec![0xff], None),
            deposit(7),
        ];

        let err = fold(&Balance, &events).expect_err("fold must stop");
        assert!(matches!(
            err,
            ProjectionError::EventProcessing { ref projection, position: 2, ref event_type, .. }
                if projection == "Balance" && event_type == "Deposited.v1"
        ));
    }

    #[test]
    fn fold_as_of_skips_later_effective_events() {
        let cutoff = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).single().expect("valid date");
        let later = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).single().expect("valid date");
        let events = vec![
            deposit(10),
            SerializedEvent::from_event(
                &Deposited {
                    amount: 99,
                    effective: Some(later),
                },
                None,
            )
            .expect("serializes"),
        ];

        let snapshot = fold_as_of(&Balance, &events, Some(cutoff)).expect("fold succeeds");
        assert_eq!(snapshot.state, 10);
        assert_eq!(snapshot.sequence, Version::new(1));

        let everything = fold(&Balance, &events).expect("fold succeeds");
        assert_eq!(everything.state, 109);
    }

    #[test]
    fn dyn_projection_round_trips_typed_state() {
        let registry = ProjectionRegistry::new().register::<Balance>();
        let projection = registry.create("Balance").expect("registered");

        let value = projection
            .fold_value(&[deposit(3), deposit(4)], None)
            .expect("fold succeeds");

        assert_eq!(value.projection_name, "Balance");
        assert_eq!(value.sequence, Version::new(2));
        assert_eq!(value.decode::<u64>().expect("decodes"), 7);
    }

    #[test]
    fn unknown_projection_is_not_registered() {
        let registry = ProjectionRegistry::new().register::<Balance>();
        assert!(matches!(
            registry.create("Nope"),
            Err(ProjectionError::NotRegistered(name)) if name == "Nope"
        ));
        assert_eq!(registry.names(), vec!["Balance"]);
    }
}
