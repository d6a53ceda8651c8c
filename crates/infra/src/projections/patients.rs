use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_core::{AggregateId, ClinicId, OrganizationId};
use clinicore_events::EventEnvelope;
use clinicore_patients::{ContactInfo, PatientEvent, PatientId, PatientStatus};

use crate::read_model::OrgStore;

/// Queryable patient directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientReadModel {
    pub patient_id: PatientId,
    pub clinic_id: Option<ClinicId>,
    pub name: String,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub contact: ContactInfo,
    pub status: PatientStatus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum PatientProjectionError {
    #[error("failed to deserialize patient event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Patient directory projection (organization-isolated, rebuildable).
#[derive(Debug)]
pub struct PatientDirectoryProjection<S>
where
    S: OrgStore<PatientId, PatientReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> PatientDirectoryProjection<S>
where
    S: OrgStore<PatientId, PatientReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, patient_id: &PatientId) -> Option<PatientReadModel> {
        self.store.get(organization_id, patient_id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<PatientReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope (idempotent, at-least-once safe).
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), PatientProjectionError> {
        if envelope.aggregate_type() != "patients.patient" {
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
                return Err(PatientProjectionError::NonMonotonicSequence { last, found: seq });
            }
            if seq <= last {
                return Ok(());
            }
            if seq != last + 1 && last != 0 {
                return Err(PatientProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: PatientEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| PatientProjectionError::Deserialize(e.to_string()))?;

            let (event_org, patient_id) = match &ev {
                PatientEvent::PatientRegistered(e) => (e.organization_id, e.patient_id),
                PatientEvent::DetailsUpdated(e) => (e.organization_id, e.patient_id),
                PatientEvent::PatientArchived(e) => (e.organization_id, e.patient_id),
            };

            if event_org != organization_id {
                return Err(PatientProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }
            if patient_id.0 != aggregate_id {
                return Err(PatientProjectionError::OrganizationIsolation(
                    "event patient_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match ev {
                PatientEvent::PatientRegistered(e) => {
                    self.store.upsert(
                        organization_id,
                        e.patient_id,
                        PatientReadModel {
                            patient_id: e.patient_id,
                            clinic_id: e.clinic_id,
                            name: e.name,
                            date_of_birth: e.date_of_birth,
                            contact: e.contact,
                            status: PatientStatus::Active,
                        },
                    );
                }
                PatientEvent::DetailsUpdated(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.patient_id) {
                        if let Some(name) = e.name {
                            rm.name = name;
                        }
                        if let Some(contact) = e.contact {
                            rm.contact = contact;
                        }
                        self.store.upsert(organization_id, e.patient_id, rm);
                    }
                }
                PatientEvent::PatientArchived(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.patient_id) {
                        rm.status = PatientStatus::Archived;
                        self.store.upsert(organization_id, e.patient_id, rm);
                    }
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }
}
