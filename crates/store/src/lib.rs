//! Data plane for the Strata platform.
//!
//! This crate owns everything that touches a database file:
//! - The project database handle pool (one SQLite database per project,
//!   plus the main database)
//! - Schema validation and payload normalization
//! - Query translation to parameterized SQL
//! - Repositories for projects, principals, sessions, API keys,
//!   collections, and documents

pub mod error;
pub mod main_store;
pub mod models;
pub mod pool;
pub mod project_store;
pub mod query;
pub mod repos;
pub mod schema;

pub use error::{FieldIssue, StoreError, StoreResult};
pub use main_store::MainStore;
pub use pool::{ProjectDb, ProjectPool};
pub use query::{
    AggregateQuery, Aggregation, Direction, DocumentQuery, FilterClause, FilterOp, OrderBy,
    QueryTranslator,
};
pub use repos::{
    ApiKeyRepo, BulkUpdateItem, CollectionRepo, DocumentRepo, PrincipalRepo, ProjectRepo,
    SessionRepo, UpdateMode,
};

use std::sync::Arc;
use strata_core::PlatformConfig;

/// Open the pool and main store from configuration.
pub async fn from_config(config: PlatformConfig) -> StoreResult<(Arc<ProjectPool>, MainStore)> {
    let pool = Arc::new(ProjectPool::open(config).await?);
    let main = MainStore::new(pool.main().clone());
    Ok((pool, main))
}
