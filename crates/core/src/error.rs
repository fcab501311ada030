//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic validation failures. Store and handler
/// failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed lane list).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty job id).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status string did not name a known job state.
    #[error("unknown job status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
