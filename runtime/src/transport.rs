//! Notification and output transports.
//!
//! Each target kind maps to one [`NotificationTransport`] in a
//! [`TransportRegistry`]. A transport only knows how to push a JSON payload to
//! an address; retries and timeouts are applied by the fan-out.

use sagaflow_core::event::{Event, SerializedEvent};
use sagaflow_core::event_bus::EventBus;
use sagaflow_core::notification::{HookType, ReturnTarget};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Errors raised by a single delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint answered with a non-success status.
    #[error("HTTP {status} from {address}")]
    Http {
        /// Target address.
        address: String,
        /// Response status code.
        status: u16,
    },

    /// The request could not be sent.
    #[error("Request to {address} failed: {reason}")]
    Request {
        /// Target address.
        address: String,
        /// Underlying failure.
        reason: String,
    },

    /// Publishing to a topic failed.
    #[error("Publish to {topic} failed: {reason}")]
    Publish {
        /// Topic name.
        topic: String,
        /// Underlying failure.
        reason: String,
    },

    /// Writing a blob failed.
    #[error("Blob write to {path} failed: {reason}")]
    Blob {
        /// Blob path.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// No recipient is registered under the address.
    #[error("No recipient registered for {0}")]
    NoRecipient(String),

    /// The attempt did not finish within the dispatch timeout.
    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    /// No transport is registered for the target kind.
    #[error("No transport registered for {0}")]
    NoTransport(TransportKind),

    /// The payload could not be encoded.
    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}

/// Boxed future returned by transports.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Pushes a JSON payload to an address.
pub trait NotificationTransport: Send + Sync {
    /// Deliver `payload` to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when delivery fails.
    fn send<'a>(&'a self, address: &'a str, payload: &'a serde_json::Value) -> TransportFuture<'a>;
}

/// Kind of delivery endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// HTTP POST.
    Webhook,
    /// Topic publish.
    CustomTopic,
    /// Real-time channel push.
    RealtimeChannel,
    /// Blob write.
    Blob,
    /// Paused-saga resume signal.
    ResumeSignal,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::CustomTopic => write!(f, "custom-topic"),
            Self::RealtimeChannel => write!(f, "realtime-channel"),
            Self::Blob => write!(f, "blob"),
            Self::ResumeSignal => write!(f, "resume-signal"),
        }
    }
}

impl From<HookType> for TransportKind {
    fn from(hook: HookType) -> Self {
        match hook {
            HookType::Webhook => Self::Webhook,
            HookType::CustomTopic => Self::CustomTopic,
            HookType::RealtimeChannel => Self::RealtimeChannel,
        }
    }
}

impl TransportKind {
    /// Transport for a query return target; `None` for polling callers.
    #[must_use]
    pub const fn for_return_target(target: ReturnTarget) -> Option<Self> {
        match target {
            ReturnTarget::None => None,
            ReturnTarget::Webhook => Some(Self::Webhook),
            ReturnTarget::CustomTopic => Some(Self::CustomTopic),
            ReturnTarget::Blob => Some(Self::Blob),
            ReturnTarget::ResumeSignal => Some(Self::ResumeSignal),
        }
    }
}

/// Transports by kind.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<TransportKind, Arc<dyn NotificationTransport>>,
}

impl TransportRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with_transport(
        mut self,
        kind: TransportKind,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        self.transports.insert(kind, transport);
        self
    }

    /// Transport registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn NotificationTransport>> {
        self.transports.get(&kind).cloned()
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.transports.keys().map(ToString::to_string).collect();
        kinds.sort_unstable();
        f.debug_struct("TransportRegistry").field("kinds", &kinds).finish()
    }
}

/// HTTP POST of the JSON payload.
#[derive(Clone, Debug, Default)]
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with a preconfigured client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl NotificationTransport for WebhookTransport {
    fn send<'a>(&'a self, address: &'a str, payload: &'a serde_json::Value) -> TransportFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(address)
                .json(payload)
                .send()
                .await
                .map_err(|e| TransportError::Request {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(TransportError::Http {
                    address: address.to_string(),
                    status: status.as_u16(),
                })
            }
        })
    }
}

/// Envelope of a payload published to a topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishedPayload {
    /// JSON payload text.
    pub payload_json: String,
}

impl Event for PublishedPayload {
    fn event_type(&self) -> &'static str {
        "NotificationPublished.v1"
    }
}

/// Publishes the payload to an [`EventBus`] topic.
#[derive(Clone)]
pub struct TopicTransport {
    bus: Arc<dyn EventBus>,
}

impl TopicTransport {
    /// Transport publishing through `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

impl NotificationTransport for TopicTransport {
    fn send<'a>(&'a self, address: &'a str, payload: &'a serde_json::Value) -> TransportFuture<'a> {
        Box::pin(async move {
            let envelope = PublishedPayload {
                payload_json: payload.to_string(),
            };
            let event = SerializedEvent::from_event(&envelope, None)
                .map_err(|e| TransportError::Encoding(e.to_string()))?;
            self.bus
                .publish(address, &event)
                .await
                .map_err(|e| TransportError::Publish {
                    topic: address.to_string(),
                    reason: e.to_string(),
                })
        })
    }
}

type ChannelMap = Arc<Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>>;

/// Pushes onto a named broadcast channel.
///
/// A push with no connected listener is not a failure.
#[derive(Clone, Debug)]
pub struct RealtimeTransport {
    channels: ChannelMap,
    capacity: usize,
}

impl RealtimeTransport {
    /// Transport whose channels buffer `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Listen on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoRecipient`] if the channel map is poisoned.
    pub fn subscribe(
        &self,
        channel: &str,
    ) -> Result<broadcast::Receiver<serde_json::Value>, TransportError> {
        Ok(self.sender(channel)?.subscribe())
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<serde_json::Value>, TransportError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| TransportError::NoRecipient(channel.to_string()))?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone())
    }
}

impl Default for RealtimeTransport {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationTransport for RealtimeTransport {
    fn send<'a>(&'a self, address: &'a str, payload: &'a serde_json::Value) -> TransportFuture<'a> {
        Box::pin(async move {
            let sender = self.sender(address)?;
            if sender.send(payload.clone()).is_err() {
                tracing::debug!(channel = address, "No realtime listener connected");
            }
            Ok(())
        })
    }
}

/// Key/value blob storage.
pub trait BlobStore: Send + Sync {
    /// Write `contents` under `path`, replacing any previous blob.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Blob`] when the write fails.
    fn put<'a>(&'a self, path: &'a str, contents: Vec<u8>) -> TransportFuture<'a>;
}

/// Writes the pretty-printed payload into a [`BlobStore`].
#[derive(Clone)]
pub struct BlobTransport {
    store: Arc<dyn BlobStore>,
}

impl BlobTransport {
    /// Transport writing into `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

impl NotificationTransport for BlobTransport {
    fn send<'a>(&'a self, address: &'a str, payload: &'a serde_json::Value) -> TransportFuture<'a> {
        Box::pin(async move {
            let contents = serde_json::to_vec_pretty(payload)
                .map_err(|e| TransportError::Encoding(e.to_string()))?;
            self.store.put(address, contents).await
        })
    }
}

type WaiterMap = Arc<Mutex<HashMap<String, mpsc::Sender<serde_json::Value>>>>;

/// Delivers a value to a paused saga registered under a name.
#[derive(Clone, Debug, Default)]
pub struct ResumeSignalTransport {
    waiters: WaiterMap,
}

impl ResumeSignalTransport {
    /// Create a transport with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a paused saga under `name` and return its signal receiver.
    ///
    /// A later registration under the same name replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoRecipient`] if the waiter map is poisoned.
    pub fn register(&self, name: &str) -> Result<mpsc::Receiver<serde_json::Value>, TransportError> {
        let (tx, rx) = mpsc::channel(1);
        self.waiters
            .lock()
            .map_err(|_| TransportError::NoRecipient(name.to_string()))?
            .insert(name.to_string(), tx);
        Ok(rx)
    }
}

impl NotificationTransport for ResumeSignalTransport {
    fn send<'a>(&'a self, address: &'a str, payload: &'a serde_json::Value) -> TransportFuture<'a> {
        Box::pin(async move {
            let sender = self
                .waiters
                .lock()
                .map_err(|_| TransportError::NoRecipient(address.to_string()))?
                .get(address)
                .cloned()
                .ok_or_else(|| TransportError::NoRecipient(address.to_string()))?;

            sender
                .send(payload.clone())
                .await
                .map_err(|_| TransportError::NoRecipient(address.to_string()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn realtime_push_reaches_subscribers() {
        let transport = RealtimeTransport::default();
        let mut listener = transport.subscribe("league-feed").expect("subscribes");

        transport
            .send("league-feed", &json!({ "code": 1 }))
            .await
            .expect("push succeeds");

        assert_eq!(listener.recv().await.expect("receives"), json!({ "code": 1 }));
    }

    #[tokio::test]
    async fn realtime_push_without_listener_succeeds() {
        let transport = RealtimeTransport::default();
        assert!(transport.send("nobody", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn resume_signal_reaches_registered_waiter() {
        let transport = ResumeSignalTransport::new();
        let mut waiter = transport.register("season-rollover").expect("registers");

        transport
            .send("season-rollover", &json!({ "teams": 12 }))
            .await
            .expect("signal delivered");

        assert_eq!(waiter.recv().await, Some(json!({ "teams": 12 })));
    }

    #[tokio::test]
    async fn resume_signal_without_waiter_fails() {
        let transport = ResumeSignalTransport::new();
        assert_eq!(
            transport.send("unknown", &json!(null)).await,
            Err(TransportError::NoRecipient("unknown".to_string()))
        );
    }

    #[test]
    fn return_targets_map_to_transports() {
        assert_eq!(TransportKind::for_return_target(ReturnTarget::None), None);
        assert_eq!(
            TransportKind::for_return_target(ReturnTarget::Blob),
            Some(TransportKind::Blob)
        );
        assert_eq!(TransportKind::from(HookType::CustomTopic), TransportKind::CustomTopic);
    }

    #[test]
    fn registry_lookup() {
        let registry = TransportRegistry::new()
            .with_transport(TransportKind::RealtimeChannel, Arc::new(RealtimeTransport::default()));
        assert!(registry.get(TransportKind::RealtimeChannel).is_some());
        assert!(registry.get(TransportKind::Webhook).is_none());
    }
}
