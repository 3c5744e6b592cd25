//! Shared primitives for all Rust crates in Trailguard.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type used across Trailguard crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Identifier linking events emitted by different adapters for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a fresh correlation identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a correlation identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Parses a correlation identifier from its string form.
    pub fn parse(value: &str) -> AppResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid correlation id: {error}")))
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed or ambiguous field metadata at configuration generation time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An adapter failed to normalize a source event.
    #[error("capture error: {0}")]
    Capture(String),

    /// A store write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A key was unavailable or an encryption call failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Invalid or out-of-range query criteria.
    #[error("query error: {0}")]
    Query(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to access the endpoint.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::{CorrelationId, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn correlation_id_formats_as_uuid() {
        let correlation_id = CorrelationId::new();
        assert_eq!(correlation_id.to_string().len(), 36);
    }

    #[test]
    fn correlation_id_round_trips_through_parse() {
        let correlation_id = CorrelationId::new();
        let parsed = CorrelationId::parse(correlation_id.to_string().as_str());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap_or_default(), correlation_id);
    }
}
