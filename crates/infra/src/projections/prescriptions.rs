use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_core::{AggregateId, OrganizationId, StaffId};
use clinicore_events::EventEnvelope;
use clinicore_patients::PatientId;
use clinicore_prescriptions::{PrescriptionEvent, PrescriptionId, PrescriptionItem, PrescriptionStatus};

use crate::read_model::OrgStore;

/// Queryable prescription read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionReadModel {
    pub prescription_id: PrescriptionId,
    pub patient_id: Option<PatientId>,
    pub prescribed_by: Option<StaffId>,
    pub rx_number: String,
    pub items: Vec<PrescriptionItem>,
    pub status: PrescriptionStatus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum PrescriptionProjectionError {
    #[error("failed to deserialize prescription event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Prescription register projection (organization-isolated, rebuildable).
#[derive(Debug)]
pub struct PrescriptionRegisterProjection<S>
where
    S: OrgStore<PrescriptionId, PrescriptionReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> PrescriptionRegisterProjection<S>
where
    S: OrgStore<PrescriptionId, PrescriptionReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(
        &self,
        organization_id: OrganizationId,
        prescription_id: &PrescriptionId,
    ) -> Option<PrescriptionReadModel> {
        self.store.get(organization_id, prescription_id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<PrescriptionReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope (idempotent, at-least-once safe).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PrescriptionProjectionError> {
        if envelope.aggregate_type() != "prescriptions.prescription" {
            return Ok(());
        }

        let organization_id = envelope.organization_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                organization_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(PrescriptionProjectionError::NonMonotonicSequence { last, found: seq });
            }
            if seq <= last {
                return Ok(());
            }
            if seq != last + 1 && last != 0 {
                return Err(PrescriptionProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: PrescriptionEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| PrescriptionProjectionError::Deserialize(e.to_string()))?;

            let (event_org, prescription_id) = match &ev {
                PrescriptionEvent::PrescriptionIssued(e) => (e.organization_id, e.prescription_id),
                PrescriptionEvent::PrescriptionDispensed(e) => (e.organization_id, e.prescription_id),
                PrescriptionEvent::PrescriptionCancelled(e) => (e.organization_id, e.prescription_id),
            };

            if event_org != organization_id {
                return Err(PrescriptionProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }
            if prescription_id.0 != aggregate_id {
                return Err(PrescriptionProjectionError::OrganizationIsolation(
                    "event prescription_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match ev {
                PrescriptionEvent::PrescriptionIssued(e) => {
                    self.store.upsert(
                        organization_id,
                        e.prescription_id,
                        PrescriptionReadModel {
                            prescription_id: e.prescription_id,
                            patient_id: Some(e.patient_id),
                            prescribed_by: Some(e.prescribed_by),
                            rx_number: e.rx_number,
                            items: e.items,
                            status: PrescriptionStatus::Issued,
                        },
                    );
                }
                PrescriptionEvent::PrescriptionDispensed(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.prescription_id) {
                        rm.status = PrescriptionStatus::Dispensed;
                        self.store.upsert(organization_id, e.prescription_id, rm);
                    }
                }
                PrescriptionEvent::PrescriptionCancelled(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.prescription_id) {
                        rm.status = PrescriptionStatus::Cancelled;
                        self.store.upsert(organization_id, e.prescription_id, rm);
                    }
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }
}
