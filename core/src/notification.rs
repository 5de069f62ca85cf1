//! Notification and output target registrations.
//!
//! A command registers its notification targets once (via `ReturnHookAdded`)
//! and a query registers its output targets once (via `OutputLocationSet`).
//! Registrations are never mutated; the fan-out reads them from the summary
//! projection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity affected by a command step: `(entity type, instance id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImpactedEntity {
    /// Entity type name (e.g. `"League"`).
    pub entity_type: String,
    /// Unique identifier of the entity instance.
    pub instance_unique_identifier: String,
}

impl ImpactedEntity {
    /// Create a new impacted entity.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            instance_unique_identifier: instance.into(),
        }
    }
}

impl fmt::Display for ImpactedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.instance_unique_identifier)
    }
}

/// Transport kind of a notification target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookType {
    /// HTTP POST to a URL.
    Webhook,
    /// Publish to a named topic.
    CustomTopic,
    /// Push onto a named real-time channel.
    RealtimeChannel,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::CustomTopic => write!(f, "custom-topic"),
            Self::RealtimeChannel => write!(f, "realtime-channel"),
        }
    }
}

/// Signal carried by a notification.
///
/// Each kind has its own discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NotificationKind {
    /// A command step completed.
    StepComplete = 1,
    /// The whole command completed.
    CommandComplete = 2,
    /// The command failed validation or a critical step.
    Error = 3,
}

impl NotificationKind {
    /// Numeric code sent on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepComplete => write!(f, "step-complete"),
            Self::CommandComplete => write!(f, "command-complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A registered notification endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Transport kind.
    pub hook_type: HookType,
    /// URL, topic name or channel name.
    pub hook_address: String,
    /// Deliver `Error` notifications.
    pub notify_on_error: bool,
    /// Deliver `StepComplete` notifications.
    pub notify_step_complete: bool,
    /// Deliver `CommandComplete` notifications.
    pub notify_on_completion: bool,
}

impl NotificationTarget {
    /// A target that receives every notification kind.
    #[must_use]
    pub fn new(hook_type: HookType, hook_address: impl Into<String>) -> Self {
        Self {
            hook_type,
            hook_address: hook_address.into(),
            notify_on_error: true,
            notify_step_complete: true,
            notify_on_completion: true,
        }
    }

    /// Webhook target receiving every notification kind.
    #[must_use]
    pub fn webhook(url: impl Into<String>) -> Self {
        Self::new(HookType::Webhook, url)
    }

    /// Topic target receiving every notification kind.
    #[must_use]
    pub fn topic(topic: impl Into<String>) -> Self {
        Self::new(HookType::CustomTopic, topic)
    }

    /// Real-time channel target receiving every notification kind.
    #[must_use]
    pub fn realtime(channel: impl Into<String>) -> Self {
        Self::new(HookType::RealtimeChannel, channel)
    }

    /// Set whether `Error` notifications are delivered.
    #[must_use]
    pub const fn with_notify_on_error(mut self, enabled: bool) -> Self {
        self.notify_on_error = enabled;
        self
    }

    /// Set whether `StepComplete` notifications are delivered.
    #[must_use]
    pub const fn with_notify_step_complete(mut self, enabled: bool) -> Self {
        self.notify_step_complete = enabled;
        self
    }

    /// Set whether `CommandComplete` notifications are delivered.
    #[must_use]
    pub const fn with_notify_on_completion(mut self, enabled: bool) -> Self {
        self.notify_on_completion = enabled;
        self
    }

    /// Whether this target subscribed to `kind`.
    #[must_use]
    pub const fn wants(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::StepComplete => self.notify_step_complete,
            NotificationKind::CommandComplete => self.notify_on_completion,
            NotificationKind::Error => self.notify_on_error,
        }
    }
}

/// Where a query's collated result is sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnTarget {
    /// The caller polls for the result.
    #[default]
    None,
    /// HTTP POST to a URL.
    Webhook,
    /// Publish to a named topic.
    CustomTopic,
    /// Write to a blob path.
    Blob,
    /// Resume a paused saga waiting on this result.
    ResumeSignal,
}

impl fmt::Display for ReturnTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Webhook => write!(f, "webhook"),
            Self::CustomTopic => write!(f, "custom-topic"),
            Self::Blob => write!(f, "blob"),
            Self::ResumeSignal => write!(f, "resume-signal"),
        }
    }
}

/// A registered query output location.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTarget {
    /// Delivery kind.
    pub target: ReturnTarget,
    /// URL, topic, blob path or paused-saga name.
    pub location: String,
}

impl OutputTarget {
    /// Create a new output target.
    #[must_use]
    pub fn new(target: ReturnTarget, location: impl Into<String>) -> Self {
        Self {
            target,
            location: location.into(),
        }
    }
}
