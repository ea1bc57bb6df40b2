//! Admin principal repository.

use crate::error::StoreResult;
use crate::models::PrincipalRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for admin principal records in the main database.
#[async_trait]
pub trait PrincipalRepo: Send + Sync {
    /// Create a principal. Fails `DuplicateName` on an existing email.
    async fn create_principal(&self, principal: &PrincipalRow) -> StoreResult<()>;

    /// Get a principal by id.
    async fn get_principal(&self, principal_id: Uuid) -> StoreResult<Option<PrincipalRow>>;

    /// Get a principal by email.
    async fn get_principal_by_email(&self, email: &str) -> StoreResult<Option<PrincipalRow>>;
}
