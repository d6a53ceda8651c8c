use clinicore_auth::{PrincipalId, Role};
use clinicore_core::{ClinicId, OrganizationId};

/// Organization context for a request.
///
/// This is immutable and must be present for all domain routes. The clinic,
/// when present, narrows the request to one site within the organization.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OrganizationContext {
    organization_id: OrganizationId,
    clinic_id: Option<ClinicId>,
}

impl OrganizationContext {
    pub fn new(organization_id: OrganizationId, clinic_id: Option<ClinicId>) -> Self {
        Self {
            organization_id,
            clinic_id,
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self {
            principal_id,
            roles,
        }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
