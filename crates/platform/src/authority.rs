//! Scope authority: credential resolution.
//!
//! Resolves a raw bearer credential (session token or API key) into a
//! [`Principal`] with its effective scopes. Lookup is strictly by SHA-256
//! hash of the credential; nothing is ever inferred from the credential
//! text itself. Scope sets come from the stored record, never re-derived
//! from key-string prefixes.

use crate::error::{PlatformError, PlatformResult};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{Principal, Scope};
use strata_store::repos::{ApiKeyRepo, SessionRepo};
use strata_store::MainStore;
use time::OffsetDateTime;
use uuid::Uuid;

/// Hash a credential for storage lookup.
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse a stored scope-set JSON column, skipping entries that no longer
/// parse rather than failing the whole credential.
fn parse_scopes(raw: &str, record_id: Uuid) -> PlatformResult<HashSet<Scope>> {
    let scopes: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        PlatformError::Store(strata_store::StoreError::Internal(format!(
            "corrupt scope set: {e}"
        )))
    })?;

    Ok(scopes
        .iter()
        .filter_map(|s| match Scope::parse(s) {
            Ok(scope) => Some(scope),
            Err(_) => {
                tracing::warn!(
                    record_id = %record_id,
                    invalid_scope = %s,
                    "credential record contains invalid scope, ignoring"
                );
                None
            }
        })
        .collect())
}

/// Resolves credentials against the main database.
pub struct ScopeAuthority {
    main: Arc<MainStore>,
}

impl ScopeAuthority {
    pub fn new(main: Arc<MainStore>) -> Self {
        Self { main }
    }

    /// Resolve a raw credential into a principal with effective scopes.
    ///
    /// Session tokens are tried first, then API keys. A missing, expired,
    /// revoked, or already-consumed credential is `InvalidCredential`; the
    /// caller learns nothing about which of those it was.
    pub async fn resolve(&self, credential: &str) -> PlatformResult<Principal> {
        if credential.is_empty() {
            return Err(PlatformError::InvalidCredential(
                "empty credential".to_string(),
            ));
        }

        let hash = hash_credential(credential);
        let now = OffsetDateTime::now_utc();

        // One-time session consumption happens inside resolve_session,
        // atomically with the lookup.
        if let Some(session) = self.main.resolve_session(&hash, now).await? {
            let scopes = parse_scopes(&session.scopes, session.session_id)?;
            return Ok(Principal {
                principal_id: session.principal_id,
                project_id: session.project_id,
                scopes,
            });
        }

        if let Some(key) = self.main.get_api_key_by_hash(&hash).await? {
            if !key.is_valid(now) {
                return Err(PlatformError::InvalidCredential(
                    "credential expired or revoked".to_string(),
                ));
            }

            let scopes = parse_scopes(&key.scopes, key.api_key_id)?;

            // Usage accounting is best-effort: a failure to record it must
            // never block authorization.
            let main = self.main.clone();
            let api_key_id = key.api_key_id;
            tokio::spawn(async move {
                if let Err(e) = main.touch_api_key(api_key_id, now).await {
                    tracing::warn!(api_key_id = %api_key_id, error = %e, "failed to record key usage");
                }
            });

            return Ok(Principal {
                // Keys without an owning principal act as themselves.
                principal_id: key.principal_id.unwrap_or(key.api_key_id),
                project_id: key.project_id,
                scopes,
            });
        }

        Err(PlatformError::InvalidCredential(
            "unknown credential".to_string(),
        ))
    }
}

// Note: hex is a simple utility, we'll inline it
pub(crate) mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
