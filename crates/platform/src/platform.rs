//! The gated operation facade.
//!
//! Every operation follows the same control flow: resolve the credential
//! (scope authority), check the requirement (authorization gate), then act
//! through the stores. A transport layer maps these methods onto whatever
//! HTTP/RPC surface it chooses; nothing here knows about wire formats.

use crate::authority::{hash_credential, hex, ScopeAuthority};
use crate::error::{PlatformError, PlatformResult};
use crate::gate;
use rand::RngCore;
use serde_json::{Map, Value};
use std::sync::Arc;
use strata_core::{
    Action, ApiKeyKind, PlatformConfig, Principal, Requirement, ResourceType, Scope,
};
use strata_store::models::{
    project_status, ApiKeyRow, BulkOutcome, CollectionPatch, CollectionRow, CollectionStats,
    CollectionUpdate, CreateCollection, CreateProject, Document, ProjectRow, SessionRow,
    UpdateProject,
};
use strata_store::query::{AggregateQuery, DocumentQuery, FilterClause};
use strata_store::repos::{
    ApiKeyRepo, BulkUpdateItem, CollectionRepo, DocumentRepo, ProjectRepo, SessionRepo,
    UpdateMode,
};
use strata_store::{MainStore, ProjectDb, ProjectPool, StoreError};
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Request to create an API key.
#[derive(Clone, Debug)]
pub struct NewApiKey {
    pub kind: ApiKeyKind,
    /// Required for project-class keys, rejected otherwise.
    pub project_id: Option<Uuid>,
    pub scopes: Vec<Scope>,
    pub expires_in_secs: Option<u64>,
    pub description: Option<String>,
}

/// Response from creating an API key. The secret is returned exactly once.
#[derive(Clone, Debug)]
pub struct CreatedApiKey {
    pub record: ApiKeyRow,
    pub secret: String,
}

/// Request to create a session.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub principal_id: Uuid,
    pub project_id: Option<Uuid>,
    pub scopes: Vec<Scope>,
    pub ttl_secs: Option<u64>,
    pub one_time: bool,
}

/// Response from creating a session. The token is returned exactly once.
#[derive(Clone, Debug)]
pub struct CreatedSession {
    pub record: SessionRow,
    pub token: String,
}

/// The in-process platform facade.
pub struct Platform {
    config: Arc<PlatformConfig>,
    pool: Arc<ProjectPool>,
    main: Arc<MainStore>,
    authority: ScopeAuthority,
}

impl Platform {
    /// Open the platform: main database, handle pool, and master key
    /// bootstrap from configuration.
    pub async fn open(config: PlatformConfig) -> PlatformResult<Self> {
        config.validate().map_err(PlatformError::Config)?;

        let (pool, main) = strata_store::from_config(config.clone()).await?;
        let main = Arc::new(main);

        if let Some(master) = &config.master_key {
            main.ensure_master_key(
                &master.key_hash,
                master.description.as_deref(),
                OffsetDateTime::now_utc(),
            )
            .await?;
        } else {
            tracing::warn!("no master key configured; no credential can create projects");
        }

        let authority = ScopeAuthority::new(main.clone());
        Ok(Self {
            config: Arc::new(config),
            pool,
            main,
            authority,
        })
    }

    /// The configuration this platform was opened with.
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// The main store. Exposed for transports that need direct read access.
    pub fn main_store(&self) -> &Arc<MainStore> {
        &self.main
    }

    /// Close all database handles. Used on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Resolve the credential and authorize the requirement. The entry
    /// point every operation goes through.
    async fn require(
        &self,
        credential: &str,
        resource: ResourceType,
        action: Action,
        project_id: Option<Uuid>,
    ) -> PlatformResult<Principal> {
        let principal = self.authority.resolve(credential).await?;
        gate::authorize(
            &principal,
            &Requirement {
                resource,
                action,
                project_id,
            },
        )?;
        Ok(principal)
    }

    /// Acquire the database handle for an operational project.
    ///
    /// Suspended projects refuse with `Forbidden` (authenticated, not
    /// authorized); deleted or unknown projects are `NotFound`.
    async fn project_db(&self, project_id: Uuid) -> PlatformResult<Arc<ProjectDb>> {
        let Some(project) = self.main.get_project(project_id).await? else {
            return Err(StoreError::NotFound(format!("project {project_id}")).into());
        };
        match project.status.as_str() {
            project_status::ACTIVE => Ok(self.pool.acquire(project_id).await?),
            project_status::SUSPENDED => Err(PlatformError::Forbidden(format!(
                "project {project_id} is suspended"
            ))),
            _ => Err(StoreError::NotFound(format!("project {project_id}")).into()),
        }
    }

    /// Resolve a collection by name within a project.
    async fn collection(
        &self,
        db: &ProjectDb,
        collection_name: &str,
    ) -> PlatformResult<CollectionRow> {
        db.get_collection_by_name(collection_name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("collection {collection_name}")).into())
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub async fn create_project(
        &self,
        credential: &str,
        create: CreateProject,
    ) -> PlatformResult<ProjectRow> {
        self.require(credential, ResourceType::Projects, Action::Write, None)
            .await?;
        let project = self.main.create_project(&create).await?;
        self.pool.reinitialize(project.project_id).await?;
        Ok(project)
    }

    pub async fn get_project(
        &self,
        credential: &str,
        project_id: Uuid,
    ) -> PlatformResult<ProjectRow> {
        self.require(
            credential,
            ResourceType::Projects,
            Action::Read,
            Some(project_id),
        )
        .await?;
        self.main
            .get_project(project_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("project {project_id}")).into())
    }

    pub async fn list_projects(&self, credential: &str) -> PlatformResult<Vec<ProjectRow>> {
        self.require(credential, ResourceType::Projects, Action::Read, None)
            .await?;
        Ok(self.main.list_projects().await?)
    }

    pub async fn update_project(
        &self,
        credential: &str,
        project_id: Uuid,
        patch: UpdateProject,
    ) -> PlatformResult<ProjectRow> {
        self.require(
            credential,
            ResourceType::Projects,
            Action::Write,
            Some(project_id),
        )
        .await?;
        if patch.status.as_deref() == Some(project_status::DELETED) {
            return Err(StoreError::Validation(vec![strata_store::FieldIssue::new(
                "status",
                "use delete_project to delete a project",
            )])
            .into());
        }
        Ok(self.main.update_project(project_id, &patch).await?)
    }

    /// Delete a project: marks the record, then closes and removes its
    /// database. One project's storage is fatal only for that project.
    pub async fn delete_project(&self, credential: &str, project_id: Uuid) -> PlatformResult<()> {
        self.require(
            credential,
            ResourceType::Projects,
            Action::Write,
            Some(project_id),
        )
        .await?;
        self.main
            .mark_project_deleted(project_id, OffsetDateTime::now_utc())
            .await?;
        self.pool.release(project_id).await?;
        Ok(())
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub async fn create_collection(
        &self,
        credential: &str,
        project_id: Uuid,
        create: CreateCollection,
    ) -> PlatformResult<CollectionRow> {
        self.require(
            credential,
            ResourceType::Collections,
            Action::Write,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        Ok(db.create_collection(&create).await?)
    }

    pub async fn get_collection(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
    ) -> PlatformResult<CollectionRow> {
        self.require(
            credential,
            ResourceType::Collections,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        self.collection(&db, collection_name).await
    }

    pub async fn list_collections(
        &self,
        credential: &str,
        project_id: Uuid,
    ) -> PlatformResult<Vec<CollectionRow>> {
        self.require(
            credential,
            ResourceType::Collections,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        Ok(db.list_collections().await?)
    }

    pub async fn update_collection(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        patch: CollectionPatch,
        force: bool,
    ) -> PlatformResult<CollectionUpdate> {
        self.require(
            credential,
            ResourceType::Collections,
            Action::Write,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db
            .update_collection(collection.collection_id, &patch, force)
            .await?)
    }

    pub async fn delete_collection(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
    ) -> PlatformResult<()> {
        self.require(
            credential,
            ResourceType::Collections,
            Action::Write,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.delete_collection(collection.collection_id).await?)
    }

    pub async fn collection_stats(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
    ) -> PlatformResult<CollectionStats> {
        self.require(
            credential,
            ResourceType::Collections,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.collection_stats(collection.collection_id).await?)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn create_document(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        payload: Map<String, Value>,
    ) -> PlatformResult<Document> {
        let principal = self
            .require(
                credential,
                ResourceType::Documents,
                Action::Write,
                Some(project_id),
            )
            .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db
            .create_document(&collection, &payload, Some(principal.principal_id))
            .await?)
    }

    pub async fn get_document(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        document_id: Uuid,
    ) -> PlatformResult<Document> {
        self.require(
            credential,
            ResourceType::Documents,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        db.get_document(&collection, document_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("document {document_id}")).into())
    }

    pub async fn list_documents(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        query: DocumentQuery,
        cancel: &CancellationToken,
    ) -> PlatformResult<Vec<Document>> {
        self.require(
            credential,
            ResourceType::Documents,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.list_documents(&collection, &query, cancel).await?)
    }

    pub async fn update_document(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        document_id: Uuid,
        patch: Map<String, Value>,
        mode: UpdateMode,
    ) -> PlatformResult<Document> {
        let principal = self
            .require(
                credential,
                ResourceType::Documents,
                Action::Write,
                Some(project_id),
            )
            .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db
            .update_document(
                &collection,
                document_id,
                &patch,
                mode,
                Some(principal.principal_id),
            )
            .await?)
    }

    pub async fn delete_document(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        document_id: Uuid,
    ) -> PlatformResult<()> {
        self.require(
            credential,
            ResourceType::Documents,
            Action::Write,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.delete_document(&collection, document_id).await?)
    }

    pub async fn bulk_create_documents(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        payloads: Vec<Map<String, Value>>,
    ) -> PlatformResult<BulkOutcome<Document>> {
        let principal = self
            .require(
                credential,
                ResourceType::Documents,
                Action::Write,
                Some(project_id),
            )
            .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db
            .bulk_create(&collection, &payloads, Some(principal.principal_id))
            .await?)
    }

    pub async fn bulk_update_documents(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        items: Vec<BulkUpdateItem>,
        mode: UpdateMode,
    ) -> PlatformResult<BulkOutcome<Document>> {
        let principal = self
            .require(
                credential,
                ResourceType::Documents,
                Action::Write,
                Some(project_id),
            )
            .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db
            .bulk_update(&collection, &items, mode, Some(principal.principal_id))
            .await?)
    }

    pub async fn bulk_delete_documents(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        document_ids: Vec<Uuid>,
    ) -> PlatformResult<BulkOutcome<Uuid>> {
        self.require(
            credential,
            ResourceType::Documents,
            Action::Write,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.bulk_delete(&collection, &document_ids).await?)
    }

    pub async fn count_documents(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        filter: Vec<FilterClause>,
    ) -> PlatformResult<u64> {
        self.require(
            credential,
            ResourceType::Documents,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.count_documents(&collection, &filter).await?)
    }

    pub async fn aggregate_documents(
        &self,
        credential: &str,
        project_id: Uuid,
        collection_name: &str,
        query: AggregateQuery,
        cancel: &CancellationToken,
    ) -> PlatformResult<Vec<Map<String, Value>>> {
        self.require(
            credential,
            ResourceType::Documents,
            Action::Read,
            Some(project_id),
        )
        .await?;
        let db = self.project_db(project_id).await?;
        let collection = self.collection(&db, collection_name).await?;
        Ok(db.aggregate_documents(&collection, &query, cancel).await?)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    pub async fn create_api_key(
        &self,
        credential: &str,
        new_key: NewApiKey,
    ) -> PlatformResult<CreatedApiKey> {
        let grantor = self
            .require(
                credential,
                ResourceType::ApiKeys,
                Action::Write,
                new_key.project_id,
            )
            .await?;
        check_grantable(&grantor, &new_key.scopes)?;

        match (new_key.kind, new_key.project_id) {
            (ApiKeyKind::Project, None) => {
                return Err(StoreError::Validation(vec![strata_store::FieldIssue::new(
                    "project_id",
                    "project-class keys require a project",
                )])
                .into());
            }
            (ApiKeyKind::Master | ApiKeyKind::Admin, Some(_)) => {
                return Err(StoreError::Validation(vec![strata_store::FieldIssue::new(
                    "project_id",
                    "master and admin keys cannot be project-bound",
                )])
                .into());
            }
            _ => {}
        }
        if new_key.kind == ApiKeyKind::Master && !grantor.is_master() {
            return Err(PlatformError::Forbidden(
                "only the master key can mint master keys".to_string(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        // Prefixes are a human hint for operators; authority only ever comes
        // from the stored record.
        let secret = generate_secret(match new_key.kind {
            ApiKeyKind::Master => "mk_",
            ApiKeyKind::Admin => "ak_",
            ApiKeyKind::Project => "pk_",
        });

        let record = ApiKeyRow {
            api_key_id: Uuid::new_v4(),
            key_hash: hash_credential(&secret),
            kind: new_key.kind.as_str().to_string(),
            principal_id: Some(grantor.principal_id),
            project_id: new_key.project_id,
            scopes: serde_json::to_string(&new_key.scopes)
                .map_err(|e| StoreError::Internal(e.to_string()))?,
            expires_at: expiry_from_now(now, new_key.expires_in_secs),
            revoked_at: None,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            description: new_key.description,
        };
        self.main.create_api_key(&record).await?;

        Ok(CreatedApiKey { record, secret })
    }

    pub async fn revoke_api_key(&self, credential: &str, api_key_id: Uuid) -> PlatformResult<()> {
        // Authenticate before touching the target so an invalid credential
        // cannot probe which key ids exist.
        let principal = self.authority.resolve(credential).await?;
        let Some(key) = self.main.get_api_key(api_key_id).await? else {
            return Err(StoreError::NotFound(format!("api key {api_key_id}")).into());
        };
        gate::authorize(
            &principal,
            &Requirement {
                resource: ResourceType::ApiKeys,
                action: Action::Write,
                project_id: key.project_id,
            },
        )?;
        Ok(self
            .main
            .revoke_api_key(api_key_id, OffsetDateTime::now_utc())
            .await?)
    }

    pub async fn list_api_keys(
        &self,
        credential: &str,
        project_id: Option<Uuid>,
    ) -> PlatformResult<Vec<ApiKeyRow>> {
        self.require(credential, ResourceType::ApiKeys, Action::Read, project_id)
            .await?;
        Ok(self.main.list_api_keys(project_id).await?)
    }

    pub async fn create_session(
        &self,
        credential: &str,
        new_session: NewSession,
    ) -> PlatformResult<CreatedSession> {
        let grantor = self
            .require(
                credential,
                ResourceType::Sessions,
                Action::Write,
                new_session.project_id,
            )
            .await?;
        check_grantable(&grantor, &new_session.scopes)?;

        let now = OffsetDateTime::now_utc();
        let ttl = new_session
            .ttl_secs
            .unwrap_or(self.config.session_ttl_secs);
        let token = generate_secret("st_");

        let record = SessionRow {
            session_id: Uuid::new_v4(),
            token_hash: hash_credential(&token),
            principal_id: new_session.principal_id,
            project_id: new_session.project_id,
            scopes: serde_json::to_string(&new_session.scopes)
                .map_err(|e| StoreError::Internal(e.to_string()))?,
            one_time: new_session.one_time,
            consumed_at: None,
            expires_at: now + Duration::seconds(i64::try_from(ttl).unwrap_or(i64::MAX)),
            revoked_at: None,
            created_at: now,
        };
        self.main.create_session(&record).await?;

        Ok(CreatedSession { record, token })
    }

    pub async fn revoke_session(&self, credential: &str, session_id: Uuid) -> PlatformResult<()> {
        let principal = self.authority.resolve(credential).await?;
        let Some(session) = self.main.get_session(session_id).await? else {
            return Err(StoreError::NotFound(format!("session {session_id}")).into());
        };
        gate::authorize(
            &principal,
            &Requirement {
                resource: ResourceType::Sessions,
                action: Action::Write,
                project_id: session.project_id,
            },
        )?;
        Ok(self
            .main
            .revoke_session(session_id, OffsetDateTime::now_utc())
            .await?)
    }
}

/// A grantor may only hand out scopes it holds itself; master may grant
/// anything.
fn check_grantable(grantor: &Principal, requested: &[Scope]) -> PlatformResult<()> {
    if grantor.is_master() {
        return Ok(());
    }
    for scope in requested {
        let held = match scope {
            Scope::Master => false,
            Scope::Grant { resource, action } => grantor.has_scope(*resource, *action),
        };
        if !held {
            return Err(PlatformError::Forbidden(format!(
                "cannot grant scope not held: {scope}"
            )));
        }
    }
    Ok(())
}

fn expiry_from_now(now: OffsetDateTime, expires_in_secs: Option<u64>) -> Option<OffsetDateTime> {
    expires_in_secs
        .map(|secs| now + Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
}

/// Generate fresh key material: a prefix plus 32 random bytes in hex.
fn generate_secret(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_secret_shape() {
        let secret = generate_secret("pk_");
        assert!(secret.starts_with("pk_"));
        assert_eq!(secret.len(), 3 + 64);
        assert_ne!(generate_secret("pk_"), secret);
    }

    #[test]
    fn test_check_grantable_blocks_escalation() {
        let grantor = Principal {
            principal_id: Uuid::new_v4(),
            project_id: None,
            scopes: [Scope::parse("documents:read").unwrap()]
                .into_iter()
                .collect::<HashSet<_>>(),
        };
        assert!(check_grantable(&grantor, &[Scope::parse("documents:read").unwrap()]).is_ok());
        assert!(check_grantable(&grantor, &[Scope::parse("documents:write").unwrap()]).is_err());
        assert!(check_grantable(&grantor, &[Scope::Master]).is_err());
    }
}
