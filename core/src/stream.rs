//! Event log identification and sequence numbering.
//!
//! Every operation instance (a command or a query) and every domain entity owns
//! exactly one append-only event log. The log is addressed by an
//! [`OperationIdentity`] triple and stored under the [`StreamId`] it renders to.
//! [`Version`] is the sequence number of the last event in a log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// Storage key of one event log.
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings
/// - `From::from()` and `new()`: no validation (trusted input)
///
/// # Examples
///
/// ```
/// use sagaflow_core::stream::StreamId;
///
/// let stream_id = StreamId::new("leagues/league/Acme FC");
/// assert_eq!(stream_id.as_str(), "leagues/league/Acme FC");
///
/// let parsed: StreamId = "leagues/create-league/42".parse().unwrap();
/// assert_eq!(parsed, StreamId::new("leagues/create-league/42"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new `StreamId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the stream ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `StreamId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseStreamIdError("Stream ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Address of one event log: `(domain, operation or entity type, instance key)`.
///
/// Commands, queries and domain entities are all addressed the same way. The
/// instance key of a command or query is usually a GUID; for an entity it is
/// the entity's natural key (for example a league name).
///
/// # Examples
///
/// ```
/// use sagaflow_core::stream::OperationIdentity;
///
/// let identity = OperationIdentity::new("leagues", "league", "Acme FC");
/// assert_eq!(identity.stream_id().as_str(), "leagues/league/Acme FC");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationIdentity {
    /// Domain the log belongs to.
    pub domain: String,
    /// Command, query or entity type name.
    pub operation_type: String,
    /// Instance key within the type.
    pub instance_key: String,
}

impl OperationIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        operation_type: impl Into<String>,
        instance_key: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            operation_type: operation_type.into(),
            instance_key: instance_key.into(),
        }
    }

    /// Render the storage key of this log.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        StreamId(format!(
            "{}/{}/{}",
            self.domain, self.operation_type, self.instance_key
        ))
    }
}

impl fmt::Display for OperationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.domain, self.operation_type, self.instance_key
        )
    }
}

/// Sequence number of the last event in a log.
///
/// Versions start at 0 (empty log) and increment by 1 for each appended event,
/// so the version of a log equals the number of events in it.
///
/// # Examples
///
/// ```
/// use sagaflow_core::stream::Version;
///
/// let v0 = Version::new(0);
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(Version::new(5).value(), 5);
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    /// The version of an empty log.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}
