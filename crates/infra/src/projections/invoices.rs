use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_billing::{InvoiceEvent, InvoiceId, InvoiceLine, PaymentEntry, PaymentStatus};
use clinicore_core::{AggregateId, ClinicId, OrganizationId};
use clinicore_events::EventEnvelope;
use clinicore_patients::PatientId;
use clinicore_treatments::TreatmentPlanId;

use crate::read_model::OrgStore;

/// Queryable invoice read model: header, ledger, and lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub patient_id: Option<PatientId>,
    pub clinic_id: Option<ClinicId>,
    pub treatment_plan_id: Option<TreatmentPlanId>,
    pub invoice_number: String,
    pub status: PaymentStatus,
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
    pub total_amount: u64,
    pub amount_paid: u64,
    pub payments: Vec<PaymentEntry>,
    pub lines: Vec<InvoiceLine>,
}

impl InvoiceReadModel {
    fn empty(invoice_id: InvoiceId) -> Self {
        Self {
            invoice_id,
            patient_id: None,
            clinic_id: None,
            treatment_plan_id: None,
            invoice_number: String::new(),
            status: PaymentStatus::Unpaid,
            due_date: None,
            total_amount: 0,
            amount_paid: 0,
            payments: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Derived outstanding balance.
    pub fn balance_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.amount_paid)
    }
}

/// Organization+aggregate cursor to support at-least-once delivery (idempotent projection).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum InvoiceProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Invoices projection.
///
/// Consumes published envelopes (JSON payloads) and maintains an
/// organization-isolated read model of every invoice including its full
/// payment list. Read models are disposable and rebuildable from the event
/// stream.
#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: OrgStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> InvoicesProjection<S>
where
    S: OrgStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query read model for one organization/invoice.
    pub fn get(&self, organization_id: OrganizationId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(organization_id, invoice_id)
    }

    /// List all invoices for an organization (disposable read model).
    pub fn list(&self, organization_id: OrganizationId) -> Vec<InvoiceReadModel> {
        self.store.list(organization_id)
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces organization isolation
    /// - Enforces monotonic sequence per (organization, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), InvoiceProjectionError> {
        if envelope.aggregate_type() != "billing.invoice" {
            return Ok(());
        }

        let organization_id = envelope.organization_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        // Cursor check (per organization + aggregate stream).
        if let Ok(mut cursors) = self.cursors.write() {
            let key = CursorKey {
                organization_id,
                aggregate_id,
            };
            let last = *cursors.get(&key).unwrap_or(&0);

            if seq == 0 {
                return Err(InvoiceProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                // First event may carry any positive sequence (some stores
                // start above 1); after that, strict increments only.
                return Err(InvoiceProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| InvoiceProjectionError::Deserialize(e.to_string()))?;

            // Validate organization isolation at the event level.
            let (event_org, invoice_id) = match &ev {
                InvoiceEvent::InvoiceCreated(e) => (e.organization_id, e.invoice_id),
                InvoiceEvent::PaymentAdded(e) => (e.organization_id, e.invoice_id),
                InvoiceEvent::PaymentUpdated(e) => (e.organization_id, e.invoice_id),
                InvoiceEvent::PaymentRemoved(e) => (e.organization_id, e.invoice_id),
                InvoiceEvent::InvoiceCancelled(e) => (e.organization_id, e.invoice_id),
            };

            if event_org != organization_id {
                return Err(InvoiceProjectionError::OrganizationIsolation(
                    "event organization_id does not match envelope organization_id".to_string(),
                ));
            }
            if invoice_id.0 != aggregate_id {
                return Err(InvoiceProjectionError::OrganizationIsolation(
                    "event invoice_id does not match envelope aggregate_id".to_string(),
                ));
            }

            // Apply update.
            match ev {
                InvoiceEvent::InvoiceCreated(e) => {
                    self.store.upsert(
                        organization_id,
                        e.invoice_id,
                        InvoiceReadModel {
                            invoice_id: e.invoice_id,
                            patient_id: Some(e.patient_id),
                            clinic_id: e.clinic_id,
                            treatment_plan_id: e.treatment_plan_id,
                            invoice_number: e.invoice_number,
                            status: e.status,
                            due_date: Some(e.due_date),
                            total_amount: e.total_amount,
                            amount_paid: 0,
                            payments: Vec::new(),
                            lines: e.lines,
                        },
                    );
                }
                InvoiceEvent::PaymentAdded(e) => {
                    let mut rm = self
                        .store
                        .get(organization_id, &e.invoice_id)
                        .unwrap_or_else(|| InvoiceReadModel::empty(e.invoice_id));
                    rm.payments.push(e.entry);
                    rm.amount_paid = e.new_amount_paid;
                    rm.status = e.status;
                    self.store.upsert(organization_id, e.invoice_id, rm);
                }
                InvoiceEvent::PaymentUpdated(e) => {
                    let mut rm = self
                        .store
                        .get(organization_id, &e.invoice_id)
                        .unwrap_or_else(|| InvoiceReadModel::empty(e.invoice_id));
                    if let Some(entry) = rm.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                        entry.amount = e.amount;
                        entry.method = e.method;
                        entry.transaction_id = e.transaction_id;
                        entry.notes = e.notes;
                    }
                    rm.amount_paid = e.new_amount_paid;
                    rm.status = e.status;
                    self.store.upsert(organization_id, e.invoice_id, rm);
                }
                InvoiceEvent::PaymentRemoved(e) => {
                    let mut rm = self
                        .store
                        .get(organization_id, &e.invoice_id)
                        .unwrap_or_else(|| InvoiceReadModel::empty(e.invoice_id));
                    rm.payments.retain(|p| p.payment_id != e.payment_id);
                    rm.amount_paid = e.new_amount_paid;
                    rm.status = e.status;
                    self.store.upsert(organization_id, e.invoice_id, rm);
                }
                InvoiceEvent::InvoiceCancelled(e) => {
                    let mut rm = self
                        .store
                        .get(organization_id, &e.invoice_id)
                        .unwrap_or_else(|| InvoiceReadModel::empty(e.invoice_id));
                    rm.status = PaymentStatus::Cancelled;
                    self.store.upsert(organization_id, e.invoice_id, rm);
                }
            }

            // Advance cursor after successful apply.
            cursors.insert(key, seq);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), InvoiceProjectionError> {
        // Reset cursors; read model values are disposable, but store is opaque.
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Clear read model per organization before rebuilding.
        {
            let mut orgs = envs.iter().map(|e| e.organization_id()).collect::<Vec<_>>();
            orgs.sort_by_key(|o| *o.as_uuid().as_bytes());
            orgs.dedup();
            for org in orgs {
                self.store.clear_organization(org);
            }
        }

        // Deterministic replay order: organization, aggregate, sequence.
        envs.sort_by_key(|e| {
            (
                *e.organization_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
