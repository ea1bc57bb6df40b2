//! API key repository.

use crate::error::StoreResult;
use crate::models::ApiKeyRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for API key records in the main database.
#[async_trait]
pub trait ApiKeyRepo: Send + Sync {
    /// Create an API key.
    async fn create_api_key(&self, key: &ApiKeyRow) -> StoreResult<()>;

    /// Get a key by id.
    async fn get_api_key(&self, api_key_id: Uuid) -> StoreResult<Option<ApiKeyRow>>;

    /// Get a key by the hash of its key material.
    async fn get_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKeyRow>>;

    /// List keys, optionally restricted to one project.
    async fn list_api_keys(&self, project_id: Option<Uuid>) -> StoreResult<Vec<ApiKeyRow>>;

    /// Revoke a key.
    async fn revoke_api_key(&self, api_key_id: Uuid, revoked_at: OffsetDateTime)
    -> StoreResult<()>;

    /// Record one use of a key: bump the usage counter and last-used stamp.
    /// Callers treat failures here as best-effort.
    async fn touch_api_key(&self, api_key_id: Uuid, used_at: OffsetDateTime) -> StoreResult<()>;

    /// Ensure the master key record matches the configured hash, revoking a
    /// stale record if the hash changed between restarts. Returns the id of
    /// the active master key.
    async fn ensure_master_key(
        &self,
        key_hash: &str,
        description: Option<&str>,
        now: OffsetDateTime,
    ) -> StoreResult<Uuid>;
}
