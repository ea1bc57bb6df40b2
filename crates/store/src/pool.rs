//! Project database handle pool.
//!
//! Owns one SQLite handle per project plus the main database. Handles are
//! opened lazily and cached; first-time opens are race-free under concurrent
//! callers. Releasing a handle (project deletion) closes the pool, removes
//! the backing file, and tombstones the id so later acquires fail instead of
//! silently recreating a deleted project's store.

use crate::error::{StoreError, StoreResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strata_core::PlatformConfig;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An open handle to one project's database.
#[derive(Debug)]
pub struct ProjectDb {
    project_id: Uuid,
    pool: Pool<Sqlite>,
}

impl ProjectDb {
    /// The owning project.
    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[derive(Default)]
struct PoolState {
    handles: HashMap<Uuid, Arc<ProjectDb>>,
    /// Ids whose backing store was removed; acquire refuses them until
    /// explicitly reinitialized.
    released: HashSet<Uuid>,
}

/// The pool of project database handles plus the main database.
pub struct ProjectPool {
    config: Arc<PlatformConfig>,
    main: Pool<Sqlite>,
    state: RwLock<PoolState>,
}

impl ProjectPool {
    /// Open the main database and prepare the pool.
    pub async fn open(config: PlatformConfig) -> StoreResult<Self> {
        let config = Arc::new(config);
        let main = open_sqlite(&config.main_db_path(), &config).await?;
        migrate_main(&main).await?;
        Ok(Self {
            config,
            main,
            state: RwLock::new(PoolState::default()),
        })
    }

    /// The main (cross-project) database pool.
    pub fn main(&self) -> &Pool<Sqlite> {
        &self.main
    }

    /// The configuration this pool was opened with.
    pub fn config(&self) -> &Arc<PlatformConfig> {
        &self.config
    }

    /// Get the handle for a project, opening and migrating its database on
    /// first use.
    ///
    /// Double-checked: the read path is contention-free once a handle
    /// exists; the write path re-checks under the exclusive lock so two
    /// concurrent first-time callers can never create two handles for one
    /// id. An unopenable store fails without caching anything.
    pub async fn acquire(&self, project_id: Uuid) -> StoreResult<Arc<ProjectDb>> {
        {
            let state = self.state.read().await;
            if state.released.contains(&project_id) {
                return Err(StoreError::NotFound(format!(
                    "project database {project_id} has been released"
                )));
            }
            if let Some(handle) = state.handles.get(&project_id) {
                return Ok(handle.clone());
            }
        }

        let mut state = self.state.write().await;
        if state.released.contains(&project_id) {
            return Err(StoreError::NotFound(format!(
                "project database {project_id} has been released"
            )));
        }
        if let Some(handle) = state.handles.get(&project_id) {
            return Ok(handle.clone());
        }

        let path = self.config.project_db_path(project_id);
        let pool = open_sqlite(&path, &self.config).await?;
        if let Err(e) = migrate_project(&pool).await {
            // Do not cache a partially initialized handle.
            pool.close().await;
            tracing::error!(project_id = %project_id, error = %e, "project database migration failed");
            return Err(e);
        }

        tracing::info!(project_id = %project_id, path = %path.display(), "opened project database");
        let handle = Arc::new(ProjectDb { project_id, pool });
        state.handles.insert(project_id, handle.clone());
        Ok(handle)
    }

    /// Close and evict a project's handle and remove its backing store.
    ///
    /// Idempotent. Later `acquire` calls fail `NotFound` until the id is
    /// explicitly reinitialized.
    pub async fn release(&self, project_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(handle) = state.handles.remove(&project_id) {
            handle.pool.close().await;
        }
        state.released.insert(project_id);

        let path = self.config.project_db_path(project_id);
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            if let Err(e) = std::fs::remove_file(&file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(project_id = %project_id, error = %e, "failed to remove database file");
                }
            }
        }
        tracing::info!(project_id = %project_id, "released project database");
        Ok(())
    }

    /// Allow a previously released id to be acquired again (fresh store).
    pub async fn reinitialize(&self, project_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.released.remove(&project_id);
        Ok(())
    }

    /// Close every handle and the main database. Used on shutdown.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        for (_, handle) in state.handles.drain() {
            handle.pool.close().await;
        }
        self.main.close().await;
    }
}

/// Open a SQLite database with the platform's standard options.
async fn open_sqlite(path: &Path, config: &PlatformConfig) -> StoreResult<Pool<Sqlite>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::StorageUnavailable(format!("{}: {e}", parent.display())))?;
    }

    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Prevent transient "database is locked" errors under concurrent access.
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        // SQLite permits limited write concurrency; a single connection per
        // database avoids persistent "database is locked" failures.
        .max_connections(1)
        // Bounds how long acquire may block on an unreachable store.
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(opts)
        .await
        .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

    Ok(pool)
}

/// Run main database migrations. Idempotent; additive only.
pub async fn migrate_main(pool: &Pool<Sqlite>) -> StoreResult<()> {
    // Migrate api_keys: add usage_count column if missing (databases created
    // before usage accounting). SQLite has no ADD COLUMN IF NOT EXISTS, so
    // check PRAGMA first.
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='api_keys')",
    )
    .fetch_one(pool)
    .await?;

    if table_exists {
        let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as("PRAGMA table_info(api_keys)")
                .fetch_all(pool)
                .await?;
        let has_usage_count = columns.iter().any(|(_, name, ..)| name == "usage_count");
        if !has_usage_count {
            sqlx::query("ALTER TABLE api_keys ADD COLUMN usage_count INTEGER NOT NULL DEFAULT 0")
                .execute(pool)
                .await?;
        }
    }

    sqlx::query(MAIN_SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

/// Run per-project database migrations. Idempotent and additive only;
/// user data is never dropped here.
pub async fn migrate_project(pool: &Pool<Sqlite>) -> StoreResult<()> {
    // Migrate documents: add validation_state if missing (databases created
    // before forced schema updates flagged documents).
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='documents')",
    )
    .fetch_one(pool)
    .await?;

    if table_exists {
        let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as("PRAGMA table_info(documents)")
                .fetch_all(pool)
                .await?;
        let has_validation_state = columns
            .iter()
            .any(|(_, name, ..)| name == "validation_state");
        if !has_validation_state {
            sqlx::query(
                "ALTER TABLE documents ADD COLUMN validation_state TEXT NOT NULL DEFAULT 'valid'",
            )
            .execute(pool)
            .await?;
        }
    }

    sqlx::query(PROJECT_SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const MAIN_SCHEMA_SQL: &str = r#"
-- Projects
CREATE TABLE IF NOT EXISTS projects (
    project_id BLOB PRIMARY KEY,
    project_name TEXT NOT NULL UNIQUE,
    settings TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);

-- Admin principals
CREATE TABLE IF NOT EXISTS principals (
    principal_id BLOB PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at TEXT NOT NULL
);

-- Sessions
CREATE TABLE IF NOT EXISTS sessions (
    session_id BLOB PRIMARY KEY,
    token_hash TEXT NOT NULL UNIQUE,
    principal_id BLOB NOT NULL,
    project_id BLOB,
    scopes TEXT NOT NULL,
    one_time INTEGER NOT NULL DEFAULT 0,
    consumed_at TEXT,
    expires_at TEXT NOT NULL,
    revoked_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_principal ON sessions(principal_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at);

-- API keys
CREATE TABLE IF NOT EXISTS api_keys (
    api_key_id BLOB PRIMARY KEY,
    key_hash TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    principal_id BLOB,
    project_id BLOB,
    scopes TEXT NOT NULL,
    expires_at TEXT,
    revoked_at TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT,
    created_at TEXT NOT NULL,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_api_keys_project ON api_keys(project_id);
"#;

const PROJECT_SCHEMA_SQL: &str = r#"
-- Collections
CREATE TABLE IF NOT EXISTS collections (
    collection_id BLOB PRIMARY KEY,
    project_id BLOB NOT NULL,
    collection_name TEXT NOT NULL UNIQUE,
    fields TEXT NOT NULL,
    indexes TEXT NOT NULL DEFAULT '[]',
    open_schema INTEGER NOT NULL DEFAULT 0,
    document_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_collections_name ON collections(collection_name);

-- Documents. The project_id is stored redundantly so cross-project leakage
-- is detectable even if a handle were ever misrouted.
CREATE TABLE IF NOT EXISTS documents (
    document_id BLOB PRIMARY KEY,
    collection_id BLOB NOT NULL REFERENCES collections(collection_id) ON DELETE CASCADE,
    project_id BLOB NOT NULL,
    payload TEXT NOT NULL,
    validation_state TEXT NOT NULL DEFAULT 'valid',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    created_by BLOB,
    updated_by BLOB
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id, created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::PlatformConfig;

    async fn test_pool() -> (tempfile::TempDir, Arc<ProjectPool>) {
        let temp = tempfile::tempdir().expect("Failed to create temp directory");
        let config = PlatformConfig::for_testing(temp.path());
        let pool = ProjectPool::open(config).await.expect("Failed to open pool");
        (temp, Arc::new(pool))
    }

    #[tokio::test]
    async fn test_acquire_creates_and_caches() {
        let (_temp, pool) = test_pool().await;
        let project_id = Uuid::new_v4();

        let first = pool.acquire(project_id).await.expect("First acquire failed");
        let second = pool.acquire(project_id).await.expect("Second acquire failed");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.project_id(), project_id);
    }

    #[tokio::test]
    async fn test_concurrent_first_acquire_yields_one_handle() {
        let (_temp, pool) = test_pool().await;
        let project_id = Uuid::new_v4();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire(project_id).await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.expect("task panicked").expect("acquire failed"));
        }

        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
    }

    #[tokio::test]
    async fn test_release_then_acquire_fails_not_found() {
        let (temp, pool) = test_pool().await;
        let project_id = Uuid::new_v4();

        pool.acquire(project_id).await.expect("acquire failed");
        let db_path = pool.config().project_db_path(project_id);
        assert!(db_path.exists());

        pool.release(project_id).await.expect("release failed");
        assert!(!db_path.exists());

        match pool.acquire(project_id).await {
            Err(StoreError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }

        // Reinitializing makes the id usable again with a fresh store.
        pool.reinitialize(project_id).await.expect("reinit failed");
        pool.acquire(project_id).await.expect("acquire after reinit failed");
        assert!(db_path.exists());
        drop(temp);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (_temp, pool) = test_pool().await;
        let project_id = Uuid::new_v4();
        let handle = pool.acquire(project_id).await.expect("acquire failed");

        migrate_project(handle.pool()).await.expect("first migrate failed");
        migrate_project(handle.pool()).await.expect("second migrate failed");
    }

    #[tokio::test]
    async fn test_unopenable_store_is_storage_unavailable() {
        let temp = tempfile::tempdir().expect("Failed to create temp directory");
        // Point the projects directory at a file, so opening must fail.
        let config = PlatformConfig::for_testing(temp.path());
        let pool = ProjectPool::open(config).await.expect("Failed to open pool");
        std::fs::write(temp.path().join("projects"), b"not a directory")
            .expect("Failed to create blocker file");

        match pool.acquire(Uuid::new_v4()).await {
            Err(StoreError::StorageUnavailable(_)) => {}
            other => panic!("expected StorageUnavailable, got {other:?}"),
        }
    }
}
