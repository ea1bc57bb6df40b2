//! Repository traits for store operations.

pub mod api_keys;
pub mod collections;
pub mod documents;
pub mod principals;
pub mod projects;
pub mod sessions;

pub use api_keys::ApiKeyRepo;
pub use collections::CollectionRepo;
pub use documents::{BulkUpdateItem, DocumentRepo, UpdateMode};
pub use principals::PrincipalRepo;
pub use projects::ProjectRepo;
pub use sessions::SessionRepo;
