//! Project repository.

use crate::error::StoreResult;
use crate::models::{CreateProject, ProjectRow, UpdateProject};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for project records in the main database.
#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// Create a project. Fails `DuplicateName` on an exact-match existing name.
    async fn create_project(&self, create: &CreateProject) -> StoreResult<ProjectRow>;

    /// Get a project by id.
    async fn get_project(&self, project_id: Uuid) -> StoreResult<Option<ProjectRow>>;

    /// Get a project by name.
    async fn get_project_by_name(&self, name: &str) -> StoreResult<Option<ProjectRow>>;

    /// List all projects.
    async fn list_projects(&self) -> StoreResult<Vec<ProjectRow>>;

    /// Apply a partial update to a project.
    async fn update_project(
        &self,
        project_id: Uuid,
        patch: &UpdateProject,
    ) -> StoreResult<ProjectRow>;

    /// Mark a project deleted. The caller is responsible for releasing its
    /// database handle.
    async fn mark_project_deleted(
        &self,
        project_id: Uuid,
        deleted_at: OffsetDateTime,
    ) -> StoreResult<()>;
}
