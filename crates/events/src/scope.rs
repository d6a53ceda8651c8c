use clinicore_core::OrganizationId;

use crate::EventEnvelope;

/// Helper trait for organization-scoped messages.
///
/// Marks types that carry an organization ID, so infrastructure components
/// (subscription loops, projections) can filter or validate tenancy without
/// knowing the payload type.
pub trait OrganizationScoped {
    fn organization_id(&self) -> OrganizationId;
}

impl<E> OrganizationScoped for EventEnvelope<E> {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id()
    }
}
