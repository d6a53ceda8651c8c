//! Deterministic authorization checks (pure policy evaluation).

use std::collections::HashSet;

use thiserror::Error;

use clinicore_core::OrganizationId;

use crate::{OrganizationMembership, Permission, PrincipalId};

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is intentionally decoupled from storage and
/// transport: API/workers derive memberships from claims and a policy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_organization_id: OrganizationId,
    pub membership: OrganizationMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("organization mismatch")]
    OrganizationMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Command-side authorization contract (checked at the command boundary).
///
/// Implement this on commands that require permissions.
/// The API layer enforces these requirements before dispatching.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal within its active organization context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_organization_id != principal.membership.organization_id {
        return Err(AuthzError::OrganizationMismatch);
    }

    let perms: HashSet<&str> = principal
        .membership
        .permissions
        .iter()
        .map(|p| p.as_str())
        .collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn principal(permissions: Vec<Permission>) -> Principal {
        let organization_id = OrganizationId::new();
        Principal {
            principal_id: PrincipalId::new(),
            active_organization_id: organization_id,
            membership: OrganizationMembership {
                organization_id,
                roles: vec![Role::new("receptionist")],
                permissions,
            },
        }
    }

    #[test]
    fn wildcard_grants_everything() {
        let p = principal(vec![Permission::new("*")]);
        assert!(authorize(&p, &Permission::new("billing.payments.record")).is_ok());
    }

    #[test]
    fn exact_permission_is_required_otherwise() {
        let p = principal(vec![Permission::new("patients.read")]);
        assert!(authorize(&p, &Permission::new("patients.read")).is_ok());
        assert_eq!(
            authorize(&p, &Permission::new("billing.payments.record")),
            Err(AuthzError::Forbidden("billing.payments.record".to_string()))
        );
    }

    #[test]
    fn cross_organization_context_is_rejected() {
        let mut p = principal(vec![Permission::new("*")]);
        p.active_organization_id = OrganizationId::new();
        assert_eq!(
            authorize(&p, &Permission::new("patients.read")),
            Err(AuthzError::OrganizationMismatch)
        );
    }
}
