use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_core::{AggregateId, ClinicId, OrganizationId};
use clinicore_events::EventEnvelope;
use clinicore_patients::PatientId;
use clinicore_treatments::{PlannedProcedure, TreatmentPlanEvent, TreatmentPlanId, TreatmentPlanStatus};

use crate::read_model::OrgStore;

/// Queryable treatment plan read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreatmentPlanReadModel {
    pub plan_id: TreatmentPlanId,
    pub clinic_id: Option<ClinicId>,
    pub patient_id: Option<PatientId>,
    pub plan_number: String,
    pub procedures: Vec<PlannedProcedure>,
    pub status: TreatmentPlanStatus,
}

impl TreatmentPlanReadModel {
    pub fn total_cost(&self) -> u64 {
        self.procedures.iter().map(|p| p.cost).sum()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum TreatmentPlanProjectionError {
    #[error("failed to deserialize treatment plan event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Treatment plan projection (organization-isolated, rebuildable).
#[derive(Debug)]
pub struct TreatmentPlansProjection<S>
where
    S: OrgStore<TreatmentPlanId, TreatmentPlanReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> TreatmentPlansProjection<S>
where
    S: OrgStore<TreatmentPlanId, TreatmentPlanReadModel>,
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
        plan_id: &TreatmentPlanId,
    ) -> Option<TreatmentPlanReadModel> {
        self.store.get(organization_id, plan_id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<TreatmentPlanReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope (idempotent, at-least-once safe).
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), TreatmentPlanProjectionError> {
        if envelope.aggregate_type() != "treatments.plan" {
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
                return Err(TreatmentPlanProjectionError::NonMonotonicSequence { last, found: seq });
            }
            if seq <= last {
                return Ok(());
            }
            if seq != last + 1 && last != 0 {
                return Err(TreatmentPlanProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: TreatmentPlanEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| TreatmentPlanProjectionError::Deserialize(e.to_string()))?;

            let (event_org, plan_id) = match &ev {
                TreatmentPlanEvent::PlanProposed(e) => (e.organization_id, e.plan_id),
                TreatmentPlanEvent::ProcedureAdded(e) => (e.organization_id, e.plan_id),
                TreatmentPlanEvent::PlanAccepted(e) => (e.organization_id, e.plan_id),
                TreatmentPlanEvent::PlanInvoiced(e) => (e.organization_id, e.plan_id),
                TreatmentPlanEvent::PlanCompleted(e) => (e.organization_id, e.plan_id),
            };

            if event_org != organization_id {
                return Err(TreatmentPlanProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }
            if plan_id.0 != aggregate_id {
                return Err(TreatmentPlanProjectionError::OrganizationIsolation(
                    "event plan_id does not match envelope aggregate_id".to_string(),
                ));
            }

            match ev {
                TreatmentPlanEvent::PlanProposed(e) => {
                    self.store.upsert(
                        organization_id,
                        e.plan_id,
                        TreatmentPlanReadModel {
                            plan_id: e.plan_id,
                            clinic_id: e.clinic_id,
                            patient_id: Some(e.patient_id),
                            plan_number: e.plan_number,
                            procedures: Vec::new(),
                            status: TreatmentPlanStatus::Proposed,
                        },
                    );
                }
                TreatmentPlanEvent::ProcedureAdded(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.plan_id) {
                        rm.procedures.push(e.procedure);
                        self.store.upsert(organization_id, e.plan_id, rm);
                    }
                }
                TreatmentPlanEvent::PlanAccepted(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.plan_id) {
                        rm.status = TreatmentPlanStatus::Accepted;
                        self.store.upsert(organization_id, e.plan_id, rm);
                    }
                }
                TreatmentPlanEvent::PlanInvoiced(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.plan_id) {
                        rm.status = TreatmentPlanStatus::Invoiced;
                        self.store.upsert(organization_id, e.plan_id, rm);
                    }
                }
                TreatmentPlanEvent::PlanCompleted(e) => {
                    if let Some(mut rm) = self.store.get(organization_id, &e.plan_id) {
                        rm.status = TreatmentPlanStatus::Completed;
                        self.store.upsert(organization_id, e.plan_id, rm);
                    }
                }
            }

            cursors.insert(key, seq);
        }

        Ok(())
    }
}
