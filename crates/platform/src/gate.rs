//! The authorization gate.
//!
//! A pure decision function over a resolved principal and a requirement.
//! Every platform operation passes through here before any store is touched.

use crate::error::{PlatformError, PlatformResult};
use strata_core::{Principal, Requirement};

/// Decide whether `principal` may perform `requirement`.
///
/// Rules, in order:
/// - The master scope always allows.
/// - The scope set must contain an exact `resource:action` grant. There is
///   no implicit escalation: write never implies read, and vice versa.
/// - A project-scoped credential may only act on its own project, and never
///   on global (no-target) operations.
pub fn authorize(principal: &Principal, requirement: &Requirement) -> PlatformResult<()> {
    if principal.is_master() {
        return Ok(());
    }

    if !principal.has_scope(requirement.resource, requirement.action) {
        return Err(PlatformError::Forbidden(format!(
            "missing required scope: {}:{}",
            requirement.resource, requirement.action
        )));
    }

    match (principal.project_id, requirement.project_id) {
        (Some(bound), Some(target)) if bound != target => Err(PlatformError::Forbidden(
            "credential is scoped to a different project".to_string(),
        )),
        (Some(_), None) => Err(PlatformError::Forbidden(
            "project-scoped credential cannot perform global operations".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strata_core::{Action, ResourceType, Scope};
    use uuid::Uuid;

    fn principal(scopes: &[&str], project_id: Option<Uuid>) -> Principal {
        Principal {
            principal_id: Uuid::new_v4(),
            project_id,
            scopes: scopes
                .iter()
                .map(|s| Scope::parse(s).unwrap())
                .collect::<HashSet<_>>(),
        }
    }

    #[test]
    fn test_master_always_allows() {
        let p = principal(&["master"], None);
        let req = Requirement::on_project(ResourceType::Projects, Action::Write, Uuid::new_v4());
        assert!(authorize(&p, &req).is_ok());
    }

    #[test]
    fn test_exact_match_required() {
        let project = Uuid::new_v4();
        let p = principal(&["documents:read"], Some(project));

        let read = Requirement::on_project(ResourceType::Documents, Action::Read, project);
        assert!(authorize(&p, &read).is_ok());

        // Read never implies write.
        let write = Requirement::on_project(ResourceType::Documents, Action::Write, project);
        assert!(matches!(
            authorize(&p, &write),
            Err(PlatformError::Forbidden(_))
        ));
    }

    #[test]
    fn test_write_does_not_imply_read() {
        let project = Uuid::new_v4();
        let p = principal(&["documents:write"], Some(project));
        let read = Requirement::on_project(ResourceType::Documents, Action::Read, project);
        assert!(matches!(
            authorize(&p, &read),
            Err(PlatformError::Forbidden(_))
        ));
    }

    #[test]
    fn test_project_scope_mismatch_denied_despite_granted_action() {
        let p = principal(&["documents:read"], Some(Uuid::new_v4()));
        let other = Requirement::on_project(ResourceType::Documents, Action::Read, Uuid::new_v4());
        assert!(matches!(
            authorize(&p, &other),
            Err(PlatformError::Forbidden(_))
        ));
    }

    #[test]
    fn test_project_scoped_credential_denied_global_ops() {
        let p = principal(&["projects:read"], Some(Uuid::new_v4()));
        let global = Requirement::global(ResourceType::Projects, Action::Read);
        assert!(matches!(
            authorize(&p, &global),
            Err(PlatformError::Forbidden(_))
        ));
    }

    #[test]
    fn test_unbound_credential_passes_project_target() {
        let p = principal(&["documents:read"], None);
        let req = Requirement::on_project(ResourceType::Documents, Action::Read, Uuid::new_v4());
        assert!(authorize(&p, &req).is_ok());
    }
}
