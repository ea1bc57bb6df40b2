//! Platform error types.

use strata_store::StoreError;

/// Platform operation errors.
///
/// Store errors are wrapped, not flattened, so the kind distinction survives
/// end-to-end: a transport can tell "retry won't help" (validation,
/// forbidden) from "retry may help" (storage unavailable) via [`kind`].
///
/// [`kind`]: PlatformError::kind
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PlatformError {
    /// Stable machine-readable kind for transport mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredential(_) => "invalid_credential",
            Self::Forbidden(_) => "forbidden",
            Self::Config(_) => "config_error",
            Self::Store(e) => e.kind(),
        }
    }
}

/// Result type for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
