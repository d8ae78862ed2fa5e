//! Error types for the client registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("invalid client spec: {0}")]
    InvalidSpec(String),
}
