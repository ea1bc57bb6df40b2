//! Per-project store: collection and document repositories over one
//! project's database handle.

use crate::error::{FieldIssue, StoreError, StoreResult};
use crate::models::{
    validation_state, BulkOutcome, CollectionPatch, CollectionRow, CollectionStats,
    CollectionUpdate, CreateCollection, Document, DocumentRow, FieldStats,
};
use crate::pool::ProjectDb;
use crate::query::{AggregateQuery, Bind, DocumentQuery, FilterClause, QueryTranslator};
use crate::repos::{BulkUpdateItem, CollectionRepo, DocumentRepo, UpdateMode};
use crate::schema;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Pool, Sqlite};
use strata_core::{FieldDefinition, IndexDefinition};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// SQLite caps bound parameters around 999; batch id lists below that.
const ID_BATCH_SIZE: usize = 900;

// =============================================================================
// Index DDL
// =============================================================================
//
// DDL cannot take bound parameters. Everything interpolated below is either
// a hex-rendered UUID or a field/index name that passed the identifier check
// in strata_core::field, so no SQL metacharacters can appear. Data values
// are always bound.

fn unique_index_name(collection_id: Uuid, field: &str) -> String {
    format!("udx_{}_{}", collection_id.simple(), field)
}

fn declared_index_name(collection_id: Uuid, index: &str) -> String {
    format!("idx_{}_{}", collection_id.simple(), index)
}

fn collection_literal(collection_id: Uuid) -> String {
    format!("x'{}'", collection_id.simple())
}

async fn create_schema_indexes(
    pool: &Pool<Sqlite>,
    collection_id: Uuid,
    fields: &[FieldDefinition],
    indexes: &[IndexDefinition],
) -> StoreResult<()> {
    for field in fields.iter().filter(|f| f.unique) {
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{}\" ON documents (json_extract(payload, '$.\"{}\"')) WHERE collection_id = {}",
            unique_index_name(collection_id, &field.name),
            field.name,
            collection_literal(collection_id),
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    for index in indexes {
        let columns: Vec<String> = index
            .fields
            .iter()
            .map(|f| format!("json_extract(payload, '$.\"{f}\"')"))
            .collect();
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}\" ON documents ({}) WHERE collection_id = {}",
            if index.unique { "UNIQUE " } else { "" },
            declared_index_name(collection_id, &index.name),
            columns.join(", "),
            collection_literal(collection_id),
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

async fn drop_schema_indexes(
    pool: &Pool<Sqlite>,
    collection_id: Uuid,
    fields: &[FieldDefinition],
    indexes: &[IndexDefinition],
) -> StoreResult<()> {
    for field in fields.iter().filter(|f| f.unique) {
        let sql = format!(
            "DROP INDEX IF EXISTS \"{}\"",
            unique_index_name(collection_id, &field.name)
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    for index in indexes {
        let sql = format!(
            "DROP INDEX IF EXISTS \"{}\"",
            declared_index_name(collection_id, &index.name)
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

/// Map a unique-index violation to `DuplicateKey` naming the field, leaving
/// every other database error untouched.
fn map_unique_violation(err: sqlx::Error, collection_id: Uuid) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let message = db_err.message();
        if message.contains("UNIQUE constraint failed") {
            let simple = collection_id.simple().to_string();
            for prefix in [format!("udx_{simple}_"), format!("idx_{simple}_")] {
                if let Some(pos) = message.find(&prefix) {
                    let field: String = message[pos + prefix.len()..]
                        .chars()
                        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                        .collect();
                    if !field.is_empty() {
                        return StoreError::DuplicateKey { field };
                    }
                }
            }
        }
    }
    err.into()
}

/// Bind translated query values onto a typed query.
fn bind_values<'q, O>(
    mut query: sqlx::query::QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    binds: &'q [Bind],
) -> sqlx::query::QueryAs<'q, Sqlite, O, SqliteArguments<'q>>
where
    O: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s.as_str()),
            Bind::Int(i) => query.bind(*i),
            Bind::Real(f) => query.bind(*f),
            Bind::Bool(b) => query.bind(*b),
            Bind::Uuid(u) => query.bind(*u),
        };
    }
    query
}

/// Bind translated query values onto a scalar query.
fn bind_scalar<'q, O>(
    mut query: sqlx::query::QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    binds: &'q [Bind],
) -> sqlx::query::QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s.as_str()),
            Bind::Int(i) => query.bind(*i),
            Bind::Real(f) => query.bind(*f),
            Bind::Bool(b) => query.bind(*b),
            Bind::Uuid(u) => query.bind(*u),
        };
    }
    query
}

fn parse_payload(raw: &str) -> StoreResult<Map<String, Value>> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Internal(format!("corrupt document payload: {e}")))
}

#[async_trait]
impl CollectionRepo for ProjectDb {
    async fn create_collection(&self, create: &CreateCollection) -> StoreResult<CollectionRow> {
        strata_core::field::validate_name(&create.name)?;
        strata_core::field::validate_fields(&create.fields)?;
        strata_core::field::validate_indexes(&create.indexes, &create.fields)?;

        if self.get_collection_by_name(&create.name).await?.is_some() {
            return Err(StoreError::DuplicateName(create.name.clone()));
        }

        let now = OffsetDateTime::now_utc();
        let row = CollectionRow {
            collection_id: Uuid::new_v4(),
            project_id: self.project_id(),
            collection_name: create.name.clone(),
            fields: serde_json::to_string(&create.fields)
                .map_err(|e| StoreError::Internal(e.to_string()))?,
            indexes: serde_json::to_string(&create.indexes)
                .map_err(|e| StoreError::Internal(e.to_string()))?,
            open_schema: create.open_schema,
            document_count: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO collections (
                collection_id, project_id, collection_name, fields, indexes,
                open_schema, document_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.collection_id)
        .bind(row.project_id)
        .bind(&row.collection_name)
        .bind(&row.fields)
        .bind(&row.indexes)
        .bind(row.open_schema)
        .bind(row.document_count)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(self.pool())
        .await?;

        create_schema_indexes(self.pool(), row.collection_id, &create.fields, &create.indexes)
            .await?;

        tracing::info!(
            project_id = %self.project_id(),
            collection = %row.collection_name,
            "created collection"
        );
        Ok(row)
    }

    async fn get_collection(&self, collection_id: Uuid) -> StoreResult<Option<CollectionRow>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            "SELECT * FROM collections WHERE collection_id = ?",
        )
        .bind(collection_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn get_collection_by_name(&self, name: &str) -> StoreResult<Option<CollectionRow>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            "SELECT * FROM collections WHERE collection_name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    async fn list_collections(&self) -> StoreResult<Vec<CollectionRow>> {
        let rows = sqlx::query_as::<_, CollectionRow>(
            "SELECT * FROM collections ORDER BY collection_name",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn update_collection(
        &self,
        collection_id: Uuid,
        patch: &CollectionPatch,
        force: bool,
    ) -> StoreResult<CollectionUpdate> {
        let Some(mut row) = self.get_collection(collection_id).await? else {
            return Err(StoreError::NotFound(format!("collection {collection_id}")));
        };

        let old_fields = row.fields()?;
        let old_indexes = row.indexes()?;

        if let Some(name) = &patch.name {
            strata_core::field::validate_name(name)?;
            if name != &row.collection_name
                && self.get_collection_by_name(name).await?.is_some()
            {
                return Err(StoreError::DuplicateName(name.clone()));
            }
            row.collection_name = name.clone();
        }

        let new_fields = match &patch.fields {
            Some(fields) => {
                strata_core::field::validate_fields(fields)?;
                fields.clone()
            }
            None => old_fields.clone(),
        };
        let new_indexes = match &patch.indexes {
            Some(indexes) => {
                strata_core::field::validate_indexes(indexes, &new_fields)?;
                indexes.clone()
            }
            None => old_indexes.clone(),
        };
        let new_open_schema = patch.open_schema.unwrap_or(row.open_schema);

        // A schema change is validated against existing documents before it
        // lands. Incompatible documents block the update unless forced, in
        // which case they are flagged, never coerced.
        let schema_changed = patch.fields.is_some() || patch.open_schema.is_some();
        let mut flagged = Vec::new();
        if schema_changed {
            let existing: Vec<(Uuid, String)> = sqlx::query_as(
                "SELECT document_id, payload FROM documents WHERE collection_id = ?",
            )
            .bind(collection_id)
            .fetch_all(self.pool())
            .await?;

            let mut first_issues: Option<Vec<FieldIssue>> = None;
            for (document_id, raw) in existing {
                let payload = parse_payload(&raw)?;
                if let Err(issues) = schema::conforms(&new_fields, &payload, new_open_schema) {
                    if first_issues.is_none() {
                        first_issues = Some(issues);
                    }
                    flagged.push(document_id);
                }
            }

            if !flagged.is_empty() && !force {
                let mut issues = first_issues.unwrap_or_default();
                issues.push(FieldIssue::new(
                    "documents",
                    format!(
                        "{} existing documents are incompatible with the new schema; use force to flag them",
                        flagged.len()
                    ),
                ));
                return Err(StoreError::Validation(issues));
            }
        }

        if patch.fields.is_some() || patch.indexes.is_some() {
            // Drop only what the new schema no longer declares; unchanged
            // indexes survive even if creating a new one fails below.
            let stale_fields: Vec<FieldDefinition> = old_fields
                .iter()
                .filter(|f| {
                    f.unique && !new_fields.iter().any(|n| n.unique && n.name == f.name)
                })
                .cloned()
                .collect();
            let stale_indexes: Vec<IndexDefinition> = old_indexes
                .iter()
                .filter(|i| !new_indexes.contains(*i))
                .cloned()
                .collect();
            drop_schema_indexes(self.pool(), collection_id, &stale_fields, &stale_indexes)
                .await?;
            create_schema_indexes(self.pool(), collection_id, &new_fields, &new_indexes)
                .await
                .map_err(|e| match e {
                    StoreError::Database(db) => map_unique_violation(db, collection_id),
                    other => other,
                })?;
        }

        row.fields = serde_json::to_string(&new_fields)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        row.indexes = serde_json::to_string(&new_indexes)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        row.open_schema = new_open_schema;
        row.updated_at = OffsetDateTime::now_utc();

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE collections SET collection_name = ?, fields = ?, indexes = ?, open_schema = ?, updated_at = ? WHERE collection_id = ?",
        )
        .bind(&row.collection_name)
        .bind(&row.fields)
        .bind(&row.indexes)
        .bind(row.open_schema)
        .bind(row.updated_at)
        .bind(collection_id)
        .execute(&mut *tx)
        .await?;

        if !flagged.is_empty() {
            for batch in flagged.chunks(ID_BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
                let sql = format!(
                    "UPDATE documents SET validation_state = ? WHERE document_id IN ({})",
                    placeholders.join(", ")
                );
                let mut query = sqlx::query(&sql).bind(validation_state::SCHEMA_MISMATCH);
                for document_id in batch {
                    query = query.bind(document_id);
                }
                query.execute(&mut *tx).await?;
            }
            tracing::warn!(
                collection_id = %collection_id,
                flagged = flagged.len(),
                "forced schema update left documents flagged"
            );
        }

        tx.commit().await?;

        Ok(CollectionUpdate {
            collection: row,
            flagged,
        })
    }

    async fn delete_collection(&self, collection_id: Uuid) -> StoreResult<()> {
        let Some(row) = self.get_collection(collection_id).await? else {
            return Err(StoreError::NotFound(format!("collection {collection_id}")));
        };
        let fields = row.fields()?;
        let indexes = row.indexes()?;

        // The FK cascade drops this collection's documents with it.
        let result = sqlx::query("DELETE FROM collections WHERE collection_id = ?")
            .bind(collection_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("collection {collection_id}")));
        }

        drop_schema_indexes(self.pool(), collection_id, &fields, &indexes).await?;

        tracing::info!(
            project_id = %self.project_id(),
            collection = %row.collection_name,
            "deleted collection"
        );
        Ok(())
    }

    async fn collection_stats(&self, collection_id: Uuid) -> StoreResult<CollectionStats> {
        let Some(row) = self.get_collection(collection_id).await? else {
            return Err(StoreError::NotFound(format!("collection {collection_id}")));
        };
        let fields = row.fields()?;

        let (count, size): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM documents WHERE collection_id = ?",
        )
        .bind(collection_id)
        .fetch_one(self.pool())
        .await?;

        let mut field_stats = Vec::with_capacity(fields.len());
        for field in &fields {
            let path = format!("$.\"{}\"", field.name);
            let null_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM documents WHERE collection_id = ? AND json_extract(payload, ?) IS NULL",
            )
            .bind(collection_id)
            .bind(&path)
            .fetch_one(self.pool())
            .await?;

            let distinct_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(DISTINCT json_extract(payload, ?)) FROM documents WHERE collection_id = ?",
            )
            .bind(&path)
            .bind(collection_id)
            .fetch_one(self.pool())
            .await?;

            field_stats.push(FieldStats {
                name: field.name.clone(),
                null_count: null_count as u64,
                distinct_count: distinct_count as u64,
            });
        }

        Ok(CollectionStats {
            document_count: count as u64,
            approx_size_bytes: size as u64,
            fields: field_stats,
        })
    }
}

#[async_trait]
impl DocumentRepo for ProjectDb {
    async fn create_document(
        &self,
        collection: &CollectionRow,
        payload: &Map<String, Value>,
        actor: Option<Uuid>,
    ) -> StoreResult<Document> {
        let fields = collection.fields()?;
        let normalized = schema::normalize(&fields, payload, collection.open_schema)
            .map_err(StoreError::Validation)?;

        let now = OffsetDateTime::now_utc();
        let document_id = Uuid::new_v4();
        let payload_json = serde_json::to_string(&normalized)
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        // The counter moves in the same transaction as the insert so it can
        // never drift from the actual document set.
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (
                document_id, collection_id, project_id, payload, validation_state,
                created_at, updated_at, created_by, updated_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(collection.collection_id)
        .bind(self.project_id())
        .bind(&payload_json)
        .bind(validation_state::VALID)
        .bind(now)
        .bind(now)
        .bind(actor)
        .bind(actor)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, collection.collection_id))?;

        sqlx::query(
            "UPDATE collections SET document_count = document_count + 1 WHERE collection_id = ?",
        )
        .bind(collection.collection_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Document {
            document_id,
            collection_id: collection.collection_id,
            project_id: self.project_id(),
            payload: normalized,
            validation_state: validation_state::VALID.to_string(),
            created_at: now,
            updated_at: now,
            created_by: actor,
            updated_by: actor,
        })
    }

    async fn get_document(
        &self,
        collection: &CollectionRow,
        document_id: Uuid,
    ) -> StoreResult<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE collection_id = ? AND document_id = ?",
        )
        .bind(collection.collection_id)
        .bind(document_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn list_documents(
        &self,
        collection: &CollectionRow,
        query: &DocumentQuery,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Document>> {
        let fields = collection.fields()?;
        let translator = QueryTranslator::new(&fields);
        let built = translator.list(collection.collection_id, query)?;

        let fetch = bind_values(
            sqlx::query_as::<_, DocumentRow>(&built.sql),
            &built.binds,
        )
        .fetch_all(self.pool());

        // Biased so an already-cancelled caller never observes results.
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            rows = fetch => rows?,
        };

        rows.into_iter()
            .map(DocumentRow::into_document)
            .collect::<StoreResult<Vec<_>>>()
    }

    async fn update_document(
        &self,
        collection: &CollectionRow,
        document_id: Uuid,
        patch: &Map<String, Value>,
        mode: UpdateMode,
        actor: Option<Uuid>,
    ) -> StoreResult<Document> {
        let fields = collection.fields()?;

        let Some(existing) = self.get_document(collection, document_id).await? else {
            return Err(StoreError::NotFound(format!("document {document_id}")));
        };

        let candidate = match mode {
            UpdateMode::Replace => patch.clone(),
            UpdateMode::Merge => {
                let mut merged = existing.payload.clone();
                for (key, value) in patch {
                    merged.insert(key.clone(), value.clone());
                }
                merged
            }
        };

        let normalized = schema::normalize(&fields, &candidate, collection.open_schema)
            .map_err(StoreError::Validation)?;
        let payload_json = serde_json::to_string(&normalized)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let now = OffsetDateTime::now_utc();

        let result = sqlx::query(
            "UPDATE documents SET payload = ?, validation_state = ?, updated_at = ?, updated_by = ? WHERE collection_id = ? AND document_id = ?",
        )
        .bind(&payload_json)
        .bind(validation_state::VALID)
        .bind(now)
        .bind(actor)
        .bind(collection.collection_id)
        .bind(document_id)
        .execute(self.pool())
        .await
        .map_err(|e| map_unique_violation(e, collection.collection_id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {document_id}")));
        }

        Ok(Document {
            document_id,
            collection_id: collection.collection_id,
            project_id: self.project_id(),
            payload: normalized,
            validation_state: validation_state::VALID.to_string(),
            created_at: existing.created_at,
            updated_at: now,
            created_by: existing.created_by,
            updated_by: actor,
        })
    }

    async fn delete_document(
        &self,
        collection: &CollectionRow,
        document_id: Uuid,
    ) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "DELETE FROM documents WHERE collection_id = ? AND document_id = ?",
        )
        .bind(collection.collection_id)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {document_id}")));
        }

        sqlx::query(
            "UPDATE collections SET document_count = MAX(0, document_count - 1) WHERE collection_id = ?",
        )
        .bind(collection.collection_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn bulk_create(
        &self,
        collection: &CollectionRow,
        payloads: &[Map<String, Value>],
        actor: Option<Uuid>,
    ) -> StoreResult<BulkOutcome<Document>> {
        let mut results = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match self.create_document(collection, payload, actor).await {
                Ok(document) => results.push(Ok(document)),
                Err(e) => results.push(Err((&e).into())),
            }
        }
        Ok(BulkOutcome { results })
    }

    async fn bulk_update(
        &self,
        collection: &CollectionRow,
        items: &[BulkUpdateItem],
        mode: UpdateMode,
        actor: Option<Uuid>,
    ) -> StoreResult<BulkOutcome<Document>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            match self
                .update_document(collection, item.document_id, &item.patch, mode, actor)
                .await
            {
                Ok(document) => results.push(Ok(document)),
                Err(e) => results.push(Err((&e).into())),
            }
        }
        Ok(BulkOutcome { results })
    }

    async fn bulk_delete(
        &self,
        collection: &CollectionRow,
        document_ids: &[Uuid],
    ) -> StoreResult<BulkOutcome<Uuid>> {
        let mut results = Vec::with_capacity(document_ids.len());
        for document_id in document_ids {
            match self.delete_document(collection, *document_id).await {
                Ok(()) => results.push(Ok(*document_id)),
                Err(e) => results.push(Err((&e).into())),
            }
        }
        Ok(BulkOutcome { results })
    }

    async fn count_documents(
        &self,
        collection: &CollectionRow,
        filter: &[FilterClause],
    ) -> StoreResult<u64> {
        let fields = collection.fields()?;
        let translator = QueryTranslator::new(&fields);
        let built = translator.count(collection.collection_id, filter)?;

        let count: i64 = bind_scalar(sqlx::query_scalar(&built.sql), &built.binds)
            .fetch_one(self.pool())
            .await?;
        Ok(count as u64)
    }

    async fn aggregate_documents(
        &self,
        collection: &CollectionRow,
        query: &AggregateQuery,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Map<String, Value>>> {
        let fields = collection.fields()?;
        let translator = QueryTranslator::new(&fields);
        let built = translator.aggregate(collection.collection_id, query)?;

        let fetch = bind_scalar(sqlx::query_scalar::<_, String>(&built.sql), &built.binds)
            .fetch_all(self.pool());

        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            rows = fetch => rows?,
        };

        rows.into_iter()
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Internal(format!("corrupt aggregate row: {e}")))
            })
            .collect()
    }
}
