//! Scope types and authorization requirements.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kinds of resources a scope can grant access to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Projects,
    Collections,
    Documents,
    Files,
    Sessions,
    ApiKeys,
    Principals,
}

impl ResourceType {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "projects" => Ok(Self::Projects),
            "collections" => Ok(Self::Collections),
            "documents" => Ok(Self::Documents),
            "files" => Ok(Self::Files),
            "sessions" => Ok(Self::Sessions),
            "api_keys" => Ok(Self::ApiKeys),
            "principals" => Ok(Self::Principals),
            _ => Err(crate::Error::InvalidScope(format!(
                "unknown resource type: {s}"
            ))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Collections => "collections",
            Self::Documents => "documents",
            Self::Files => "files",
            Self::Sessions => "sessions",
            Self::ApiKeys => "api_keys",
            Self::Principals => "principals",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The action a scope grants on its resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
}

impl Action {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(crate::Error::InvalidScope(format!("unknown action: {s}"))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single permission unit.
///
/// The string form is `resource:action` (e.g. `documents:read`), or the
/// literal `master` for the all-powerful scope. A grant is an exact match:
/// `documents:write` never implies `documents:read`, and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Short-circuits every authorization check.
    Master,
    /// Grants exactly one action on one resource type.
    Grant {
        resource: ResourceType,
        action: Action,
    },
}

impl Scope {
    /// Parse from the `resource:action` string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s == "master" {
            return Ok(Self::Master);
        }
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidScope(format!("malformed scope: {s}")))?;
        Ok(Self::Grant {
            resource: ResourceType::parse(resource)?,
            action: Action::parse(action)?,
        })
    }

    /// Whether this scope grants `action` on `resource`.
    ///
    /// Exact match only; `Master` matches everything.
    pub fn grants(&self, resource: ResourceType, action: Action) -> bool {
        match self {
            Self::Master => true,
            Self::Grant {
                resource: r,
                action: a,
            } => *r == resource && *a == action,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Grant { resource, action } => write!(f, "{resource}:{action}"),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// What an operation demands of the caller's scope set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requirement {
    /// Resource type being acted on.
    pub resource: ResourceType,
    /// Requested action.
    pub action: Action,
    /// Target project, when the resource is project-scoped.
    pub project_id: Option<Uuid>,
}

impl Requirement {
    /// Requirement on a project-scoped resource.
    pub fn on_project(resource: ResourceType, action: Action, project_id: Uuid) -> Self {
        Self {
            resource,
            action,
            project_id: Some(project_id),
        }
    }

    /// Requirement on a global (admin) resource.
    pub fn global(resource: ResourceType, action: Action) -> Self {
        Self {
            resource,
            action,
            project_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!(Scope::parse("master").unwrap(), Scope::Master);
        assert_eq!(
            Scope::parse("documents:read").unwrap(),
            Scope::Grant {
                resource: ResourceType::Documents,
                action: Action::Read,
            }
        );
        assert!(Scope::parse("documents").is_err());
        assert!(Scope::parse("documents:admin").is_err());
        assert!(Scope::parse("widgets:read").is_err());
    }

    #[test]
    fn test_scope_display_roundtrip() {
        for s in [
            "master",
            "projects:write",
            "collections:read",
            "documents:write",
            "api_keys:read",
        ] {
            assert_eq!(Scope::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_no_implicit_escalation() {
        let write = Scope::parse("documents:write").unwrap();
        let read = Scope::parse("documents:read").unwrap();

        assert!(write.grants(ResourceType::Documents, Action::Write));
        assert!(!write.grants(ResourceType::Documents, Action::Read));
        assert!(read.grants(ResourceType::Documents, Action::Read));
        assert!(!read.grants(ResourceType::Documents, Action::Write));
        assert!(!read.grants(ResourceType::Collections, Action::Read));
    }

    #[test]
    fn test_master_grants_everything() {
        let master = Scope::Master;
        assert!(master.grants(ResourceType::Projects, Action::Write));
        assert!(master.grants(ResourceType::Documents, Action::Read));
        assert!(master.grants(ResourceType::ApiKeys, Action::Write));
    }
}
