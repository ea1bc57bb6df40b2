//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid field definition: {0}")]
    InvalidFieldDefinition(String),

    #[error("invalid index definition: {0}")]
    InvalidIndexDefinition(String),

    #[error("invalid api key kind: {0}")]
    InvalidApiKeyKind(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
