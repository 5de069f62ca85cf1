//! Lifecycle status of a command or query instance.
//!
//! The status is a classification derived by folding the operation's own log;
//! it is never stored. Transitions are monotonic:
//!
//! ```text
//! Created ──ValidationSucceeded──► Validated ──Completed──► Completed
//!    │
//!    └──fatal validation error──► Invalid
//! ```
//!
//! Any other (status, signal) pair leaves the status unchanged, so `Invalid`
//! and `Completed` absorb every later event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an operation instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// The log exists and no validation outcome has been recorded.
    #[default]
    Created,
    /// Validation succeeded; forward work may proceed.
    Validated,
    /// Validation failed fatally.
    Invalid,
    /// The operation finished.
    Completed,
}

/// Lifecycle events the status machine reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// `ValidationSucceeded` was recorded.
    ValidationSucceeded,
    /// A validation error was recorded.
    ValidationFailed {
        /// Whether the error is fatal.
        fatal: bool,
    },
    /// `CommandCompleted` / `QueryCompleted` was recorded.
    Completed,
}

impl OperationStatus {
    /// Next status after `signal`.
    #[must_use]
    pub const fn apply(self, signal: LifecycleSignal) -> Self {
        match (self, signal) {
            (Self::Created, LifecycleSignal::ValidationSucceeded) => Self::Validated,
            (Self::Created, LifecycleSignal::ValidationFailed { fatal: true }) => Self::Invalid,
            (Self::Validated, LifecycleSignal::Completed) => Self::Completed,
            (current, _) => current,
        }
    }

    /// `Invalid` and `Completed` are terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid | Self::Completed)
    }

    /// Only `Validated` operations may run business steps.
    #[must_use]
    pub const fn allows_processing(self) -> bool {
        matches!(self, Self::Validated)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Validated => write!(f, "validated"),
            Self::Invalid => write!(f, "invalid"),
            Self::Completed => write!(f, "completed"),
        }
    }
}
