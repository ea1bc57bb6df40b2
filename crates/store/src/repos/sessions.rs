//! Session repository.

use crate::error::StoreResult;
use crate::models::SessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for session records in the main database.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a session.
    async fn create_session(&self, session: &SessionRow) -> StoreResult<()>;

    /// Resolve a session by token hash, returning it only if it is currently
    /// valid (not revoked, expired, or consumed).
    ///
    /// For one-time sessions the consumption check-and-mark happens here,
    /// atomically with the lookup: under concurrent callers at most one
    /// observes `Some`.
    async fn resolve_session(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<SessionRow>>;

    /// Get a session by id, regardless of validity.
    async fn get_session(&self, session_id: Uuid) -> StoreResult<Option<SessionRow>>;

    /// Revoke a session (logout).
    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> StoreResult<()>;

    /// Delete sessions past their expiry. Returns the number removed.
    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> StoreResult<u64>;
}
