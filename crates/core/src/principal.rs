//! Resolved principals and API key classes.

use crate::scope::{Action, ResourceType, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// The class of an API key record.
///
/// The class is carried by the stored record; the scope set on the record is
/// what grants authority. Key-string prefixes are a human hint only and are
/// never parsed for permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyKind {
    /// Server-owner key; carries the master scope.
    Master,
    /// Cross-project administrative key.
    Admin,
    /// Key bound to a single project.
    Project,
}

impl ApiKeyKind {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "master" => Ok(Self::Master),
            "admin" => Ok(Self::Admin),
            "project" => Ok(Self::Project),
            _ => Err(crate::Error::InvalidApiKeyKind(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Admin => "admin",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for ApiKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authenticated identity behind a request, with its effective scopes.
#[derive(Clone, Debug)]
pub struct Principal {
    /// Identity the credential resolved to.
    pub principal_id: Uuid,
    /// Project the credential is bound to, if project-scoped.
    pub project_id: Option<Uuid>,
    /// Granted scopes.
    pub scopes: HashSet<Scope>,
}

impl Principal {
    /// Whether the principal carries the master scope.
    pub fn is_master(&self) -> bool {
        self.scopes.contains(&Scope::Master)
    }

    /// Whether any granted scope covers `action` on `resource`.
    pub fn has_scope(&self, resource: ResourceType, action: Action) -> bool {
        self.scopes.iter().any(|s| s.grants(resource, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_kind_parse() {
        assert_eq!(ApiKeyKind::parse("master").unwrap(), ApiKeyKind::Master);
        assert_eq!(ApiKeyKind::parse("project").unwrap(), ApiKeyKind::Project);
        assert!(ApiKeyKind::parse("root").is_err());
    }

    #[test]
    fn test_principal_scope_check() {
        let principal = Principal {
            principal_id: Uuid::new_v4(),
            project_id: None,
            scopes: [Scope::parse("documents:read").unwrap()].into_iter().collect(),
        };
        assert!(principal.has_scope(ResourceType::Documents, Action::Read));
        assert!(!principal.has_scope(ResourceType::Documents, Action::Write));
        assert!(!principal.is_master());
    }
}
