//! In-process service surface for the Strata platform.
//!
//! This crate ties the data plane together behind a uniform authorization
//! model:
//! - [`authority::ScopeAuthority`] resolves bearer credentials (session
//!   tokens and API keys) to principals with effective scopes
//! - [`gate::authorize`] is the pure allow/deny decision
//! - [`Platform`] is the facade a transport layer calls; every operation
//!   goes credential → gate → store

pub mod authority;
pub mod error;
pub mod gate;
pub mod platform;

pub use authority::ScopeAuthority;
pub use error::{PlatformError, PlatformResult};
pub use platform::{CreatedApiKey, CreatedSession, NewApiKey, NewSession, Platform};
