//! Main database store: projects, principals, sessions, and API keys.

use crate::error::{FieldIssue, StoreError, StoreResult};
use crate::models::{
    project_status, ApiKeyRow, CreateProject, PrincipalRow, ProjectRow, SessionRow, UpdateProject,
};
use crate::repos::{ApiKeyRepo, PrincipalRepo, ProjectRepo, SessionRepo};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use time::OffsetDateTime;
use uuid::Uuid;

/// Store over the main (cross-project) database.
#[derive(Clone)]
pub struct MainStore {
    pool: Pool<Sqlite>,
}

impl MainStore {
    /// Wrap the main database pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl ProjectRepo for MainStore {
    async fn create_project(&self, create: &CreateProject) -> StoreResult<ProjectRow> {
        if create.name.trim().is_empty() {
            return Err(StoreError::Validation(vec![FieldIssue::new(
                "name",
                "project name must not be empty",
            )]));
        }
        if self.get_project_by_name(&create.name).await?.is_some() {
            return Err(StoreError::DuplicateName(create.name.clone()));
        }

        let now = OffsetDateTime::now_utc();
        let row = ProjectRow {
            project_id: Uuid::new_v4(),
            project_name: create.name.clone(),
            settings: serde_json::to_string(&create.settings)
                .map_err(|e| StoreError::Internal(e.to_string()))?,
            status: project_status::ACTIVE.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO projects (project_id, project_name, settings, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.project_id)
        .bind(&row.project_name)
        .bind(&row.settings)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(project_id = %row.project_id, name = %row.project_name, "created project");
        Ok(row)
    }

    async fn get_project(&self, project_id: Uuid) -> StoreResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_project_by_name(&self, name: &str) -> StoreResult<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_projects(&self) -> StoreResult<Vec<ProjectRow>> {
        let rows =
            sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY project_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn update_project(
        &self,
        project_id: Uuid,
        patch: &UpdateProject,
    ) -> StoreResult<ProjectRow> {
        let Some(mut row) = self.get_project(project_id).await? else {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        };

        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(StoreError::Validation(vec![FieldIssue::new(
                    "name",
                    "project name must not be empty",
                )]));
            }
            if name != &row.project_name && self.get_project_by_name(name).await?.is_some() {
                return Err(StoreError::DuplicateName(name.clone()));
            }
            row.project_name = name.clone();
        }
        if let Some(settings) = &patch.settings {
            row.settings = serde_json::to_string(settings)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        if let Some(status) = &patch.status {
            match status.as_str() {
                project_status::ACTIVE | project_status::SUSPENDED | project_status::DELETED => {
                    row.status = status.clone();
                }
                other => {
                    return Err(StoreError::Validation(vec![FieldIssue::new(
                        "status",
                        format!("unknown status: {other}"),
                    )]));
                }
            }
        }
        row.updated_at = OffsetDateTime::now_utc();

        let result = sqlx::query(
            "UPDATE projects SET project_name = ?, settings = ?, status = ?, updated_at = ? WHERE project_id = ?",
        )
        .bind(&row.project_name)
        .bind(&row.settings)
        .bind(&row.status)
        .bind(row.updated_at)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }
        Ok(row)
    }

    async fn mark_project_deleted(
        &self,
        project_id: Uuid,
        deleted_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE projects SET status = 'deleted', updated_at = ? WHERE project_id = ? AND status <> 'deleted'",
        )
        .bind(deleted_at)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }
        tracing::info!(project_id = %project_id, "marked project deleted");
        Ok(())
    }
}

#[async_trait]
impl PrincipalRepo for MainStore {
    async fn create_principal(&self, principal: &PrincipalRow) -> StoreResult<()> {
        if self
            .get_principal_by_email(&principal.email)
            .await?
            .is_some()
        {
            return Err(StoreError::DuplicateName(principal.email.clone()));
        }
        sqlx::query(
            "INSERT INTO principals (principal_id, email, display_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(principal.principal_id)
        .bind(&principal.email)
        .bind(&principal.display_name)
        .bind(principal.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_principal(&self, principal_id: Uuid) -> StoreResult<Option<PrincipalRow>> {
        let row =
            sqlx::query_as::<_, PrincipalRow>("SELECT * FROM principals WHERE principal_id = ?")
                .bind(principal_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn get_principal_by_email(&self, email: &str) -> StoreResult<Option<PrincipalRow>> {
        let row = sqlx::query_as::<_, PrincipalRow>("SELECT * FROM principals WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl SessionRepo for MainStore {
    async fn create_session(&self, session: &SessionRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, token_hash, principal_id, project_id, scopes,
                one_time, consumed_at, expires_at, revoked_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.session_id)
        .bind(&session.token_hash)
        .bind(session.principal_id)
        .bind(session.project_id)
        .bind(&session.scopes)
        .bind(session.one_time)
        .bind(session.consumed_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_session(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<SessionRow>> {
        // The consumption check-and-mark must be atomic with the lookup for
        // one-time sessions: the guarded UPDATE below acquires SQLite's
        // exclusive lock, so exactly one concurrent caller sees a row flip
        // from unconsumed to consumed.
        let mut tx = self.pool.begin().await?;

        let session =
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(mut session) = session else {
            tx.commit().await?;
            return Ok(None);
        };

        if session.revoked_at.is_some() || now > session.expires_at {
            tx.commit().await?;
            return Ok(None);
        }

        if session.one_time {
            let result = sqlx::query(
                "UPDATE sessions SET consumed_at = ? WHERE session_id = ? AND consumed_at IS NULL",
            )
            .bind(now)
            .bind(session.session_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            if result.rows_affected() == 0 {
                // Already consumed; this caller lost the race.
                return Ok(None);
            }
            session.consumed_at = Some(now);
            return Ok(Some(session));
        }

        tx.commit().await?;
        if session.consumed_at.is_some() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sessions SET revoked_at = ? WHERE session_id = ?")
            .bind(revoked_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ApiKeyRepo for MainStore {
    async fn create_api_key(&self, key: &ApiKeyRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                api_key_id, key_hash, kind, principal_id, project_id, scopes,
                expires_at, revoked_at, usage_count, last_used_at, created_at, description
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.api_key_id)
        .bind(&key.key_hash)
        .bind(&key.kind)
        .bind(key.principal_id)
        .bind(key.project_id)
        .bind(&key.scopes)
        .bind(key.expires_at)
        .bind(key.revoked_at)
        .bind(key.usage_count)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .bind(&key.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_api_key(&self, api_key_id: Uuid) -> StoreResult<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE api_key_id = ?")
            .bind(api_key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_api_keys(&self, project_id: Option<Uuid>) -> StoreResult<Vec<ApiKeyRow>> {
        let rows = match project_id {
            Some(id) => {
                sqlx::query_as::<_, ApiKeyRow>(
                    "SELECT * FROM api_keys WHERE project_id = ? ORDER BY created_at",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    async fn revoke_api_key(
        &self,
        api_key_id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE api_key_id = ?")
            .bind(revoked_at)
            .bind(api_key_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("api key {api_key_id}")));
        }
        Ok(())
    }

    async fn touch_api_key(&self, api_key_id: Uuid, used_at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query(
            "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = ? WHERE api_key_id = ?",
        )
        .bind(used_at)
        .bind(api_key_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_master_key(
        &self,
        key_hash: &str,
        description: Option<&str>,
        now: OffsetDateTime,
    ) -> StoreResult<Uuid> {
        let existing = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT * FROM api_keys WHERE kind = 'master' AND revoked_at IS NULL",
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            if row.key_hash == key_hash {
                return Ok(row.api_key_id);
            }
            // Hash changed between restarts: the previous master key is
            // revoked and replaced.
            sqlx::query("UPDATE api_keys SET revoked_at = ? WHERE api_key_id = ?")
                .bind(now)
                .bind(row.api_key_id)
                .execute(&self.pool)
                .await?;
            tracing::warn!(api_key_id = %row.api_key_id, "master key hash changed; previous key revoked");
        }

        let key = ApiKeyRow {
            api_key_id: Uuid::new_v4(),
            key_hash: key_hash.to_string(),
            kind: strata_core::ApiKeyKind::Master.as_str().to_string(),
            principal_id: None,
            project_id: None,
            scopes: serde_json::to_string(&[strata_core::Scope::Master])
                .map_err(|e| StoreError::Internal(e.to_string()))?,
            expires_at: None,
            revoked_at: None,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            description: description.map(str::to_string),
        };
        self.create_api_key(&key).await?;
        tracing::info!(api_key_id = %key.api_key_id, "created master key record");
        Ok(key.api_key_id)
    }
}
