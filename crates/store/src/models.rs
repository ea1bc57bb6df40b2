//! Database models mapping to the main and per-project schemas.

use crate::error::{StoreError, StoreResult};
use serde_json::{Map, Value};
use sqlx::FromRow;
use strata_core::{FieldDefinition, IndexDefinition};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Main database: projects, principals, sessions, API keys
// =============================================================================

/// Project record.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub project_id: Uuid,
    pub project_name: String,
    pub settings: String, // JSON object
    pub status: String,   // 'active' | 'suspended' | 'deleted'
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ProjectRow {
    /// Parse the settings column.
    pub fn settings(&self) -> StoreResult<Map<String, Value>> {
        serde_json::from_str(&self.settings)
            .map_err(|e| StoreError::Internal(format!("corrupt project settings: {e}")))
    }
}

/// Project lifecycle status.
pub mod project_status {
    pub const ACTIVE: &str = "active";
    pub const SUSPENDED: &str = "suspended";
    pub const DELETED: &str = "deleted";
}

/// DTO for creating a new project.
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub name: String,
    pub settings: Map<String, Value>,
}

/// DTO for updating an existing project. All fields are optional.
#[derive(Debug, Clone, Default)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub settings: Option<Map<String, Value>>,
    pub status: Option<String>,
}

/// Admin principal record.
#[derive(Debug, Clone, FromRow)]
pub struct PrincipalRow {
    pub principal_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Session record.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub token_hash: String,
    pub principal_id: Uuid,
    pub project_id: Option<Uuid>,
    pub scopes: String, // JSON array
    pub one_time: bool,
    pub consumed_at: Option<OffsetDateTime>,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// API key record.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub api_key_id: Uuid,
    pub key_hash: String,
    pub kind: String, // 'master' | 'admin' | 'project'
    pub principal_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub scopes: String, // JSON array
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub usage_count: i64,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub description: Option<String>,
}

impl ApiKeyRow {
    /// Check if the key is usable (not expired or revoked).
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if now > expires_at {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Per-project database: collections and documents
// =============================================================================

/// Collection record.
#[derive(Debug, Clone, FromRow)]
pub struct CollectionRow {
    pub collection_id: Uuid,
    pub project_id: Uuid,
    pub collection_name: String,
    pub fields: String,  // JSON array of field definitions
    pub indexes: String, // JSON array of index definitions
    pub open_schema: bool,
    pub document_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl CollectionRow {
    /// Parse the declared field definitions.
    pub fn fields(&self) -> StoreResult<Vec<FieldDefinition>> {
        serde_json::from_str(&self.fields)
            .map_err(|e| StoreError::Internal(format!("corrupt field definitions: {e}")))
    }

    /// Parse the declared index definitions.
    pub fn indexes(&self) -> StoreResult<Vec<IndexDefinition>> {
        serde_json::from_str(&self.indexes)
            .map_err(|e| StoreError::Internal(format!("corrupt index definitions: {e}")))
    }
}

/// DTO for creating a collection.
#[derive(Debug, Clone)]
pub struct CreateCollection {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub open_schema: bool,
}

/// DTO for updating a collection. All fields are optional.
#[derive(Debug, Clone, Default)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub fields: Option<Vec<FieldDefinition>>,
    pub indexes: Option<Vec<IndexDefinition>>,
    pub open_schema: Option<bool>,
}

/// Outcome of a collection schema update.
#[derive(Debug, Clone)]
pub struct CollectionUpdate {
    /// The collection after the update.
    pub collection: CollectionRow,
    /// Documents flagged as incompatible when the update was forced.
    pub flagged: Vec<Uuid>,
}

/// Validation state of a stored document.
pub mod validation_state {
    pub const VALID: &str = "valid";
    /// Set on documents a forced schema update left incompatible.
    pub const SCHEMA_MISMATCH: &str = "schema_mismatch";
}

/// Document record.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub document_id: Uuid,
    pub collection_id: Uuid,
    pub project_id: Uuid,
    pub payload: String, // JSON object
    pub validation_state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

impl DocumentRow {
    /// Parse this row into the domain document shape.
    pub fn into_document(self) -> StoreResult<Document> {
        let payload: Map<String, Value> = serde_json::from_str(&self.payload)
            .map_err(|e| StoreError::Internal(format!("corrupt document payload: {e}")))?;
        Ok(Document {
            document_id: self.document_id,
            collection_id: self.collection_id,
            project_id: self.project_id,
            payload,
            validation_state: self.validation_state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by,
            updated_by: self.updated_by,
        })
    }
}

/// One document with its payload parsed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Document {
    pub document_id: Uuid,
    pub collection_id: Uuid,
    pub project_id: Uuid,
    pub payload: Map<String, Value>,
    pub validation_state: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

/// On-demand collection statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionStats {
    pub document_count: u64,
    /// Approximate stored payload bytes.
    pub approx_size_bytes: u64,
    pub fields: Vec<FieldStats>,
}

/// Per-field statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FieldStats {
    pub name: String,
    /// Documents where the field is null or absent.
    pub null_count: u64,
    /// Distinct non-null values.
    pub distinct_count: u64,
}

// =============================================================================
// Bulk operation outcomes
// =============================================================================

/// Error recorded for one failed item of a bulk operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BulkError {
    /// Stable error kind, as [`StoreError::kind`].
    pub kind: String,
    pub message: String,
}

impl From<&StoreError> for BulkError {
    fn from(err: &StoreError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Per-item outcome of a bulk operation, in input order.
///
/// Items succeed or fail independently; one failure never aborts the batch,
/// so callers can retry exactly the failed subset.
#[derive(Debug)]
pub struct BulkOutcome<T> {
    pub results: Vec<Result<T, BulkError>>,
}

impl<T> BulkOutcome<T> {
    /// Number of items that succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of items that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}
