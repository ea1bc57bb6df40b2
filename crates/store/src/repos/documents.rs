//! Document repository.

use crate::error::StoreResult;
use crate::models::{BulkOutcome, CollectionRow, Document};
use crate::query::{AggregateQuery, DocumentQuery, FilterClause};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How an update treats keys absent from the patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Only supplied keys change. The default: full replace silently
    /// dropping fields is a correctness trap.
    #[default]
    Merge,
    /// The patch is the entire new payload. Explicit opt-in.
    Replace,
}

/// One item of a bulk update.
#[derive(Clone, Debug)]
pub struct BulkUpdateItem {
    pub document_id: Uuid,
    pub patch: Map<String, Value>,
}

/// Repository for documents within one project's database.
///
/// Operations take the resolved [`CollectionRow`] so callers pay the
/// collection lookup once; the schema used for validation and query
/// translation always comes from that row.
#[async_trait]
pub trait DocumentRepo: Send + Sync {
    /// Validate, normalize, and persist a new document. Increments the
    /// collection's document counter in the same transaction.
    async fn create_document(
        &self,
        collection: &CollectionRow,
        payload: &Map<String, Value>,
        actor: Option<Uuid>,
    ) -> StoreResult<Document>;

    /// Get a document by id.
    async fn get_document(
        &self,
        collection: &CollectionRow,
        document_id: Uuid,
    ) -> StoreResult<Option<Document>>;

    /// List documents matching a query. Honors `cancel`: a cancelled call
    /// returns `Cancelled` and discards partial results.
    async fn list_documents(
        &self,
        collection: &CollectionRow,
        query: &DocumentQuery,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Document>>;

    /// Update a document according to `mode`.
    async fn update_document(
        &self,
        collection: &CollectionRow,
        document_id: Uuid,
        patch: &Map<String, Value>,
        mode: UpdateMode,
        actor: Option<Uuid>,
    ) -> StoreResult<Document>;

    /// Delete a document. Decrements the collection's document counter in
    /// the same transaction.
    async fn delete_document(
        &self,
        collection: &CollectionRow,
        document_id: Uuid,
    ) -> StoreResult<()>;

    /// Create many documents. Items are validated and executed
    /// independently; one failure never aborts the batch.
    async fn bulk_create(
        &self,
        collection: &CollectionRow,
        payloads: &[Map<String, Value>],
        actor: Option<Uuid>,
    ) -> StoreResult<BulkOutcome<Document>>;

    /// Update many documents, independently per item.
    async fn bulk_update(
        &self,
        collection: &CollectionRow,
        items: &[BulkUpdateItem],
        mode: UpdateMode,
        actor: Option<Uuid>,
    ) -> StoreResult<BulkOutcome<Document>>;

    /// Delete many documents, independently per item. Missing ids report
    /// not-found without affecting the rest.
    async fn bulk_delete(
        &self,
        collection: &CollectionRow,
        document_ids: &[Uuid],
    ) -> StoreResult<BulkOutcome<Uuid>>;

    /// Count documents matching a filter.
    async fn count_documents(
        &self,
        collection: &CollectionRow,
        filter: &[FilterClause],
    ) -> StoreResult<u64>;

    /// Run a grouped aggregation. Honors `cancel` like `list_documents`.
    async fn aggregate_documents(
        &self,
        collection: &CollectionRow,
        query: &AggregateQuery,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Map<String, Value>>>;
}
