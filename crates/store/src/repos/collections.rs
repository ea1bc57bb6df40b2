//! Collection repository.

use crate::error::StoreResult;
use crate::models::{
    CollectionPatch, CollectionRow, CollectionStats, CollectionUpdate, CreateCollection,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for collection definitions within one project's database.
#[async_trait]
pub trait CollectionRepo: Send + Sync {
    /// Create a collection with its schema and indexes. Fails
    /// `DuplicateName` on an exact-match existing name.
    async fn create_collection(&self, create: &CreateCollection) -> StoreResult<CollectionRow>;

    /// Get a collection by id.
    async fn get_collection(&self, collection_id: Uuid) -> StoreResult<Option<CollectionRow>>;

    /// Get a collection by name.
    async fn get_collection_by_name(&self, name: &str) -> StoreResult<Option<CollectionRow>>;

    /// List all collections.
    async fn list_collections(&self) -> StoreResult<Vec<CollectionRow>>;

    /// Apply a partial update to a collection.
    ///
    /// A schema change (field retype or removal) is validated against every
    /// existing document. Incompatible documents block the update unless
    /// `force` is set, in which case they are flagged (never silently
    /// coerced) and their ids are reported in the outcome.
    async fn update_collection(
        &self,
        collection_id: Uuid,
        patch: &CollectionPatch,
        force: bool,
    ) -> StoreResult<CollectionUpdate>;

    /// Delete a collection and all its documents. Destructive: soft-delete,
    /// if wanted, is an application-level field.
    async fn delete_collection(&self, collection_id: Uuid) -> StoreResult<()>;

    /// Compute on-demand statistics. Staleness is acceptable; nothing here
    /// is incrementally maintained.
    async fn collection_stats(&self, collection_id: Uuid) -> StoreResult<CollectionStats>;
}
