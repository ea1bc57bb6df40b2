//! Store error types.

use strata_core::FieldType;
use thiserror::Error;

/// One field-level validation problem.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldIssue {
    /// Field the issue is about.
    pub field: String,
    /// Human-readable description.
    pub message: String,
    /// Declared type, when the issue is a type mismatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<FieldType>,
    /// JSON type actually received, when the issue is a type mismatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl FieldIssue {
    /// Issue without type information (missing/unknown field).
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            expected: None,
            received: None,
        }
    }

    /// Type-mismatch issue carrying expected and received types.
    pub fn mismatch(field: impl Into<String>, expected: FieldType, received: &str) -> Self {
        Self {
            field: field.into(),
            message: format!("expected {expected}, got {received}"),
            expected: Some(expected),
            received: Some(received.to_string()),
        }
    }
}

/// Format issues for display, capping at MAX_DISPLAYED to prevent log bloat.
fn format_issues(issues: &[FieldIssue]) -> String {
    const MAX_DISPLAYED: usize = 5;
    let rendered: Vec<String> = issues
        .iter()
        .take(MAX_DISPLAYED)
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect();
    if issues.len() <= MAX_DISPLAYED {
        rendered.join("; ")
    } else {
        format!(
            "{} (and {} more)",
            rendered.join("; "),
            issues.len() - MAX_DISPLAYED
        )
    }
}

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("duplicate value for unique field '{field}'")]
    DuplicateKey { field: String },

    #[error("validation failed: {}", format_issues(.0))]
    Validation(Vec<FieldIssue>),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Stable machine-readable kind for transport mapping.
    ///
    /// The distinction matters to callers: validation and duplicate kinds
    /// mean a retry will not help, storage_unavailable means it might.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::DuplicateName(_) => "duplicate_name",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::Validation(_) => "validation",
            Self::UnknownField(_) => "unknown_field",
            Self::UnsupportedAggregation(_) => "unsupported_aggregation",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Conflict(_) => "conflict",
            Self::Cancelled => "cancelled",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The per-field issues carried by a validation error, if any.
    pub fn issues(&self) -> Option<&[FieldIssue]> {
        match self {
            Self::Validation(issues) => Some(issues),
            _ => None,
        }
    }
}

impl From<strata_core::Error> for StoreError {
    fn from(err: strata_core::Error) -> Self {
        // Malformed definitions and scopes are caller errors, not server faults.
        Self::Validation(vec![FieldIssue::new("schema", err.to_string())])
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
