//! Core domain types and shared logic for the Strata data platform.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Scope and permission units for authorization
//! - Field type descriptors for user-declared collection schemas
//! - Resolved principals and API key classes
//! - Platform configuration

pub mod config;
pub mod error;
pub mod field;
pub mod principal;
pub mod scope;

pub use config::{MasterKeyConfig, PlatformConfig};
pub use error::{Error, Result};
pub use field::{FieldDefinition, FieldType, IndexDefinition};
pub use principal::{ApiKeyKind, Principal};
pub use scope::{Action, Requirement, ResourceType, Scope};

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default pool acquire timeout in milliseconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;

/// Default session lifetime in seconds (12 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 12 * 60 * 60;
