use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_core::{AggregateId, ClinicId, OrganizationId, StaffId};
use clinicore_events::EventEnvelope;
use clinicore_patients::PatientId;
use clinicore_scheduling::{AppointmentEvent, AppointmentId, AppointmentStatus};

use crate::read_model::OrgStore;

/// Queryable appointment read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentReadModel {
    pub appointment_id: AppointmentId,
    pub clinic_id: Option<ClinicId>,
    pub patient_id: Option<PatientId>,
    pub dentist_id: Option<StaffId>,
    pub starts_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ends_at: Option<chrono::DateTime<chrono::Utc>>,
    pub reason: String,
    pub status: AppointmentStatus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum AppointmentProjectionError {
    #[error("failed to deserialize appointment event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Appointment book projection (organization-isolated, rebuildable).
#[derive(Debug)]
pub struct AppointmentBookProjection<S>
where
    S: OrgStore<AppointmentId, AppointmentReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> AppointmentBookProjection<S>
where
    S: OrgStore<AppointmentId, AppointmentReadModel>,
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
        appointment_id: &AppointmentId,
    ) -> Option<AppointmentReadModel> {
        self.store.get(organization_id, appointment_id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<AppointmentReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope (idempotent, at-least-once safe).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), AppointmentProjectionError> {
        if envelope.aggregate_type() != "scheduling.appointment" {
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
                return Err(AppointmentProjectionError::NonMonotonicSequence { last, found: seq });
            }
            if seq <= last {
                return Ok(());
            }
            if seq != last + 1 && last != 0 {
                return Err(AppointmentProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: AppointmentEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| AppointmentProjectionError::Deserialize(e.to_string()))?;

            let (event_org, appointment_id) = match &ev {
                AppointmentEvent::AppointmentScheduled(e) => (e.organization_id, e.appointment_id),
                AppointmentEvent::AppointmentRescheduled(e) => (e.organization_id, e.appointment_id),
                AppointmentEvent::AppointmentCompleted(e) => (e.organization_id, e.appointment_id),
                AppointmentEvent::AppointmentCancelled(e) => (e.organization_id, e.appointment_id),
            };

            if event_org != organization_id {
                return Err(AppointmentProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }
            if appointment_id.0 != aggregate_id {
                return Err(AppointmentProjectionError::OrganizationIsolation(
                    "event appointment_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match ev {
                AppointmentEvent::AppointmentScheduled(e) => {
                    self.store.upsert(
                        organization_id,
                        e.appointment_id,
                        AppointmentReadModel {
                            appointment_id: e.appointment_id,
                            clinic_id: e.clinic_id,
                            patient_id: Some(e.patient_id),
                            dentist_id: Some(e.dentist_id),
                            starts_at: Some(e.starts_at),
                            ends_at: Some(e.ends_at),
                            reason: e.reason,
                            status: AppointmentStatus::Scheduled,
                        },
                    );
                }
                AppointmentEvent::AppointmentRescheduled(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.appointment_id) {
                        rm.starts_at = Some(e.starts_at);
                        rm.ends_at = Some(e.ends_at);
                        self.store.upsert(organization_id, e.appointment_id, rm);
                    }
                }
                AppointmentEvent::AppointmentCompleted(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.appointment_id) {
                        rm.status = AppointmentStatus::Completed;
                        self.store.upsert(organization_id, e.appointment_id, rm);
                    }
                }
                AppointmentEvent::AppointmentCancelled(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.appointment_id) {
                        rm.status = AppointmentStatus::Cancelled;
                        self.store.upsert(organization_id, e.appointment_id, rm);
                    }
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }
}
