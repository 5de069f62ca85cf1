//! # Sagaflow Testing
//!
//! Testing utilities for sagaflow coordinators.
//!
//! This crate provides:
//! - In-memory implementations of the storage and transport collaborators
//! - A fixed clock for deterministic timestamps
//! - Opt-in log output for tests
//!
//! ## Example
//!
//! ```ignore
//! use sagaflow_testing::{InMemoryEventStore, RecordingTransport, test_clock};
//!
//! #[tokio::test]
//! async fn league_is_formed() {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let saga = CommandSaga::new(config, CreateLeague, store.clone(), transports, Arc::new(test_clock()));
//!
//!     let run = saga.run(&request, &[]).await;
//!     assert!(run.result.is_success());
//! }
//! ```

use chrono::{DateTime, Utc};
use sagaflow_core::environment::Clock;

/// Mock implementations of the coordinator collaborators.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::stream::{self, StreamExt};
    use sagaflow_core::event::SerializedEvent;
    use sagaflow_core::event_bus::{EventBus, EventBusError, EventStream};
    use sagaflow_core::event_store::{EventStore, EventStoreError, StoreFuture};
    use sagaflow_core::stream::{StreamId, Version};
    use sagaflow_runtime::transport::{
        BlobStore, NotificationTransport, TransportError, TransportFuture,
    };
    use std::collections::{HashMap, HashSet};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex, PoisonError, RwLock};
    use tokio::sync::broadcast;

    type Logs = HashMap<StreamId, Vec<SerializedEvent>>;

    /// In-memory event store.
    ///
    /// Logs must be created before they are appended to, as with a real
    /// store. Loading a log that was never created yields no events.
    #[derive(Clone, Debug, Default)]
    pub struct InMemoryEventStore {
        logs: Arc<RwLock<Logs>>,
    }

    impl InMemoryEventStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every event of `stream_id`, for assertions.
        #[must_use]
        pub fn events(&self, stream_id: &StreamId) -> Vec<SerializedEvent> {
            self.logs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(stream_id)
                .cloned()
                .unwrap_or_default()
        }

        /// Event types of `stream_id` in append order.
        #[must_use]
        pub fn event_types(&self, stream_id: &StreamId) -> Vec<String> {
            self.events(stream_id)
                .into_iter()
                .map(|e| e.event_type)
                .collect()
        }

        /// Number of created logs.
        #[must_use]
        pub fn stream_count(&self) -> usize {
            self.logs.read().unwrap_or_else(PoisonError::into_inner).len()
        }

        fn poisoned<T>(_: PoisonError<T>) -> EventStoreError {
            EventStoreError::DatabaseError("event store lock poisoned".to_string())
        }
    }

    impl EventStore for InMemoryEventStore {
        fn append_events(
            &self,
            stream_id: StreamId,
            expected_version: Option<Version>,
            events: Vec<SerializedEvent>,
        ) -> StoreFuture<'_, Version> {
            Box::pin(async move {
                let mut logs = self.logs.write().map_err(Self::poisoned)?;
                let log = logs
                    .get_mut(&stream_id)
                    .ok_or_else(|| EventStoreError::StreamNotFound(stream_id.clone()))?;

                let actual = Version::new(log.len() as u64);
                if let Some(expected) = expected_version {
                    if expected != actual {
                        return Err(EventStoreError::ConcurrencyConflict {
                            stream_id,
                            expected,
                            actual,
                        });
                    }
                }

                log.extend(events);
                Ok(Version::new(log.len() as u64))
            })
        }

        fn load_events(
            &self,
            stream_id: StreamId,
            from_version: Option<Version>,
        ) -> StoreFuture<'_, Vec<SerializedEvent>> {
            Box::pin(async move {
                let logs = self.logs.read().map_err(Self::poisoned)?;
                let skip = from_version.map_or(0, |v| usize::try_from(v.value()).unwrap_or(usize::MAX));
                Ok(logs
                    .get(&stream_id)
                    .map(|log| log.iter().skip(skip).cloned().collect())
                    .unwrap_or_default())
            })
        }

        fn exists(&self, stream_id: StreamId) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                Ok(self
                    .logs
                    .read()
                    .map_err(Self::poisoned)?
                    .contains_key(&stream_id))
            })
        }

        fn create_if_not_exists(&self, stream_id: StreamId) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut logs = self.logs.write().map_err(Self::poisoned)?;
                if logs.contains_key(&stream_id) {
                    return Ok(false);
                }
                logs.insert(stream_id, Vec::new());
                Ok(true)
            })
        }
    }

    /// In-memory event bus with one broadcast channel per topic.
    #[derive(Clone, Debug)]
    pub struct InMemoryEventBus {
        topics: Arc<Mutex<HashMap<String, broadcast::Sender<SerializedEvent>>>>,
        capacity: usize,
    }

    impl InMemoryEventBus {
        /// Create a bus buffering up to 64 events per topic.
        #[must_use]
        pub fn new() -> Self {
            Self::with_capacity(64)
        }

        /// Create a bus buffering up to `capacity` events per topic.
        #[must_use]
        pub fn with_capacity(capacity: usize) -> Self {
            Self {
                topics: Arc::new(Mutex::new(HashMap::new())),
                capacity: capacity.max(1),
            }
        }

        fn sender(&self, topic: &str) -> broadcast::Sender<SerializedEvent> {
            self.topics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .clone()
        }
    }

    impl Default for InMemoryEventBus {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EventBus for InMemoryEventBus {
        fn publish(
            &self,
            topic: &str,
            event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            let topic = topic.to_string();
            let event = event.clone();
            Box::pin(async move {
                if topic.is_empty() {
                    return Err(EventBusError::InvalidTopic(topic));
                }
                // No subscriber is not an error; the event is simply dropped.
                let _ = self.sender(&topic).send(event);
                Ok(())
            })
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
            Box::pin(async move {
                if topics.is_empty() {
                    return Err(EventBusError::SubscriptionFailed {
                        topics,
                        reason: "no topics given".to_string(),
                    });
                }

                let streams = topics.iter().map(|topic| {
                    let mut receiver = self.sender(topic).subscribe();
                    async_stream::stream! {
                        loop {
                            match receiver.recv().await {
                                Ok(event) => yield Ok(event),
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    yield Err(EventBusError::TransportError(format!(
                                        "subscriber lagged by {skipped} events"
                                    )));
                                },
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    }
                    .boxed()
                });

                let merged: EventStream = Box::pin(stream::select_all(streams));
                Ok(merged)
            })
        }
    }

    /// In-memory blob store.
    #[derive(Clone, Debug, Default)]
    pub struct InMemoryBlobStore {
        blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl InMemoryBlobStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Contents stored under `path`.
        #[must_use]
        pub fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.blobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path)
                .cloned()
        }

        /// Contents under `path` parsed as JSON.
        #[must_use]
        pub fn get_json(&self, path: &str) -> Option<serde_json::Value> {
            self.get(path)
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        }
    }

    impl BlobStore for InMemoryBlobStore {
        fn put<'a>(&'a self, path: &'a str, contents: Vec<u8>) -> TransportFuture<'a> {
            Box::pin(async move {
                self.blobs
                    .lock()
                    .map_err(|_| TransportError::Blob {
                        path: path.to_string(),
                        reason: "blob store lock poisoned".to_string(),
                    })?
                    .insert(path.to_string(), contents);
                Ok(())
            })
        }
    }

    #[derive(Debug, Default)]
    struct Recording {
        delivered: Vec<(String, serde_json::Value)>,
        attempts: HashMap<String, u32>,
        failing: HashSet<String>,
        hanging: HashSet<String>,
    }

    /// Transport that records deliveries.
    ///
    /// Addresses marked with [`fail_address`](Self::fail_address) fail every
    /// attempt; addresses marked with [`hang_address`](Self::hang_address)
    /// never answer, so only a dispatch timeout ends them.
    #[derive(Clone, Debug, Default)]
    pub struct RecordingTransport {
        recording: Arc<Mutex<Recording>>,
    }

    impl RecordingTransport {
        /// Create a transport that accepts everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every send to `address`.
        #[must_use]
        pub fn fail_address(self, address: impl Into<String>) -> Self {
            self.lock().failing.insert(address.into());
            self
        }

        /// Never complete a send to `address`.
        #[must_use]
        pub fn hang_address(self, address: impl Into<String>) -> Self {
            self.lock().hanging.insert(address.into());
            self
        }

        /// Successful deliveries in completion order.
        #[must_use]
        pub fn delivered(&self) -> Vec<(String, serde_json::Value)> {
            self.lock().delivered.clone()
        }

        /// Payloads delivered to `address`.
        #[must_use]
        pub fn delivered_to(&self, address: &str) -> Vec<serde_json::Value> {
            self.lock()
                .delivered
                .iter()
                .filter(|(a, _)| a == address)
                .map(|(_, payload)| payload.clone())
                .collect()
        }

        /// Send attempts made to `address`, successful or not.
        #[must_use]
        pub fn attempts(&self, address: &str) -> u32 {
            self.lock().attempts.get(address).copied().unwrap_or(0)
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
            self.recording.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl NotificationTransport for RecordingTransport {
        fn send<'a>(
            &'a self,
            address: &'a str,
            payload: &'a serde_json::Value,
        ) -> TransportFuture<'a> {
            Box::pin(async move {
                let (fail, hang) = {
                    let mut recording = self.lock();
                    *recording.attempts.entry(address.to_string()).or_default() += 1;
                    (
                        recording.failing.contains(address),
                        recording.hanging.contains(address),
                    )
                };

                if hang {
                    std::future::pending::<()>().await;
                }
                if fail {
                    return Err(TransportError::Request {
                        address: address.to_string(),
                        reason: "configured to fail".to_string(),
                    });
                }

                self.lock()
                    .delivered
                    .push((address.to_string(), payload.clone()));
                Ok(())
            })
        }
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use sagaflow_testing::mocks::FixedClock;
    /// use sagaflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Install a test log subscriber once.
///
/// Honours `RUST_LOG`, defaulting to `warn`. Later calls are no-ops.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber installed by an earlier test wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{
    FixedClock, InMemoryBlobStore, InMemoryEventBus, InMemoryEventStore, RecordingTransport,
    test_clock,
};

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors
mod tests {
    use super::*;
    use futures::StreamExt;
    use sagaflow_core::event::SerializedEvent;
    use sagaflow_core::event_bus::EventBus;
    use sagaflow_core::event_store::{EventStore, EventStoreError};
    use sagaflow_core::stream::{StreamId, Version};
    use sagaflow_runtime::transport::{BlobStore, NotificationTransport, TransportError};
    use serde_json::json;
    use std::time::Duration;

    fn event(event_type: &str) -> SerializedEvent {
        SerializedEvent::new(event_type.to_string(), vec![1, 2, 3], None)
    }

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn append_requires_a_created_log() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("leagues/league/Acme FC");

        let err = store
            .append_events(stream.clone(), None, vec![event("Formed.v1")])
            .await;
        assert!(matches!(err, Err(EventStoreError::StreamNotFound(_))));

        assert!(store.create_if_not_exists(stream.clone()).await.expect("creates"));
        assert!(!store.create_if_not_exists(stream.clone()).await.expect("exists"));
        let version = store
            .append_events(stream.clone(), None, vec![event("Formed.v1"), event("Renamed.v1")])
            .await
            .expect("appends");
        assert_eq!(version, Version::new(2));
        assert_eq!(store.event_types(&stream), vec!["Formed.v1", "Renamed.v1"]);
    }

    #[tokio::test]
    async fn expected_version_is_enforced() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("leagues/league/Acme FC");
        store.create_if_not_exists(stream.clone()).await.expect("creates");

        let conflict = store
            .append_events(stream.clone(), Some(Version::new(3)), vec![event("Formed.v1")])
            .await;
        assert!(matches!(
            conflict,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(0)
        ));

        store
            .append_events(stream.clone(), Some(Version::new(0)), vec![event("Formed.v1")])
            .await
            .expect("appends at expected version");
        let tail = store
            .load_events(stream, Some(Version::new(1)))
            .await
            .expect("loads");
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn missing_log_loads_empty() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("leagues/league/Nowhere");
        assert!(store.load_events(stream.clone(), None).await.expect("loads").is_empty());
        assert!(!store.exists(stream).await.expect("checks"));
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers_of_the_topic() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["league-updates"]).await.expect("subscribes");

        bus.publish("other", &event("Ignored.v1")).await.expect("publishes");
        bus.publish("league-updates", &event("Formed.v1")).await.expect("publishes");

        let received = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivered in time")
            .expect("stream open")
            .expect("no lag");
        assert_eq!(received.event_type, "Formed.v1");
    }

    #[tokio::test]
    async fn recording_transport_records_and_fails_on_demand() {
        let transport = RecordingTransport::new().fail_address("https://down.test");
        let payload = json!({ "code": 2 });

        transport.send("https://up.test", &payload).await.expect("delivers");
        let failed = transport.send("https://down.test", &payload).await;

        assert!(matches!(failed, Err(TransportError::Request { .. })));
        assert_eq!(transport.delivered_to("https://up.test"), vec![payload]);
        assert_eq!(transport.attempts("https://down.test"), 1);
    }

    #[tokio::test]
    async fn hanging_address_never_completes() {
        let transport = RecordingTransport::new().hang_address("https://slow.test");
        let payload = json!({});
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            transport.send("https://slow.test", &payload),
        )
        .await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn blob_store_keeps_last_write() {
        let blobs = InMemoryBlobStore::new();
        blobs.put("results/acme.json", b"{\"v\":1}".to_vec()).await.expect("writes");
        blobs.put("results/acme.json", b"{\"v\":2}".to_vec()).await.expect("writes");
        assert_eq!(blobs.get_json("results/acme.json"), Some(json!({ "v": 2 })));
    }
}
