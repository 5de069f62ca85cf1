//! Command and query requests as handed over by an ingress layer.

use crate::notification::{OutputTarget, ReturnTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The payload could not be split into named parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Parameters must be a JSON object, found {found}")]
pub struct ParameterShapeError {
    /// JSON kind that was found instead.
    pub found: &'static str,
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Split a payload into `(name, JSON text)` pairs.
///
/// `null` means no parameters. Any other non-object payload is a structural
/// error.
fn split_parameters(
    parameters: &serde_json::Value,
) -> Result<Vec<(String, String)>, ParameterShapeError> {
    match parameters {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()),
        other => Err(ParameterShapeError {
            found: json_kind(other),
        }),
    }
}

/// A request to run a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command type name (e.g. `"create-league"`).
    pub command_name: String,
    /// Instance key; generated when the caller does not supply one.
    pub command_unique_identifier: Uuid,
    /// Opaque structured payload.
    pub parameters: serde_json::Value,
    /// Free-text status supplied by the caller.
    pub status: Option<String>,
}

impl CommandRequest {
    /// Create a request with a fresh identifier.
    #[must_use]
    pub fn new(command_name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self::with_identifier(command_name, Uuid::new_v4(), parameters)
    }

    /// Create a request for a known instance, as on a redrive.
    #[must_use]
    pub fn with_identifier(
        command_name: impl Into<String>,
        command_unique_identifier: Uuid,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            command_name: command_name.into(),
            command_unique_identifier,
            parameters,
            status: None,
        }
    }

    /// Named parameters as `(name, JSON text)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterShapeError`] if the payload is neither `null` nor an
    /// object.
    pub fn parameter_pairs(&self) -> Result<Vec<(String, String)>, ParameterShapeError> {
        split_parameters(&self.parameters)
    }
}

/// A request to run a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query type name (e.g. `"get-league-summary"`).
    pub query_name: String,
    /// Instance key; generated when the caller does not supply one.
    pub query_unique_identifier: Uuid,
    /// Opaque structured payload.
    pub parameters: serde_json::Value,
    /// Where the result goes.
    #[serde(default)]
    pub return_target: ReturnTarget,
    /// URL, topic, blob path or paused-saga name for `return_target`.
    #[serde(default)]
    pub return_path: String,
    /// Effective date projections are evaluated at.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl QueryRequest {
    /// Create a request with a fresh identifier and no output target.
    #[must_use]
    pub fn new(query_name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            query_name: query_name.into(),
            query_unique_identifier: Uuid::new_v4(),
            parameters,
            return_target: ReturnTarget::None,
            return_path: String::new(),
            as_of: None,
        }
    }

    /// Send the result to `target` at `path`.
    #[must_use]
    pub fn with_return(mut self, target: ReturnTarget, path: impl Into<String>) -> Self {
        self.return_target = target;
        self.return_path = path.into();
        self
    }

    /// Evaluate projections at an effective date.
    #[must_use]
    pub const fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// The output registration, unless the caller polls.
    #[must_use]
    pub fn output_target(&self) -> Option<OutputTarget> {
        match self.return_target {
            ReturnTarget::None => None,
            target => Some(OutputTarget::new(target, self.return_path.clone())),
        }
    }

    /// Named parameters as `(name, JSON text)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterShapeError`] if the payload is neither `null` nor an
    /// object.
    pub fn parameter_pairs(&self) -> Result<Vec<(String, String)>, ParameterShapeError> {
        split_parameters(&self.parameters)
    }
}
