use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinicore_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DocumentKind, DomainError, OrganizationId,
    StaffId, numbering,
};
use clinicore_events::Event;
use clinicore_patients::PatientId;
use clinicore_treatments::TreatmentPlanId;

/// Invoice identifier (organization-scoped via `organization_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Derived payment status of an invoice.
///
/// `Cancelled` is a terminal lifecycle state; every other variant is a pure
/// function of the ledger via [`derive_payment_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "unpaid")]
    Unpaid,
    #[serde(rename = "partially paid")]
    PartiallyPaid,
    #[serde(rename = "paid")]
    Paid,
    #[serde(rename = "overdue")]
    Overdue,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PartiallyPaid => "partially paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

/// Derive the payment status from the ledger.
///
/// Applied uniformly on every mutation path (create, add, update, remove):
/// - paid in full ⇒ `Paid`, regardless of due date;
/// - otherwise past the due date ⇒ `Overdue`;
/// - otherwise `Unpaid` or `PartiallyPaid` by whether anything was paid.
pub fn derive_payment_status(
    amount_paid: u64,
    total_amount: u64,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> PaymentStatus {
    if amount_paid >= total_amount {
        return PaymentStatus::Paid;
    }
    if due_date < now {
        return PaymentStatus::Overdue;
    }
    if amount_paid == 0 {
        PaymentStatus::Unpaid
    } else {
        PaymentStatus::PartiallyPaid
    }
}

/// How a payment was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Insurance,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Insurance => "insurance",
            PaymentMethod::Cheque => "cheque",
        }
    }
}

/// Invoice line for a billed procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub description: String,
    /// Procedure code (e.g. "D2740"), when the line maps to one.
    pub procedure_code: Option<String>,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

/// One recorded payment against the invoice balance.
///
/// Entries are owned by the invoice (no independent lifecycle) and the list
/// is strictly append-ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub payment_id: Uuid,
    /// Receipt number ("P-202501-0003"), allocated when the payment is taken.
    pub receipt_number: Option<String>,
    pub amount: u64,
    pub paid_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    /// Staff member who recorded the payment; immutable across edits.
    pub received_by: StaffId,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    organization_id: Option<OrganizationId>,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    treatment_plan_id: Option<TreatmentPlanId>,
    invoice_number: String,
    status: PaymentStatus,
    lines: Vec<InvoiceLine>,
    due_date: Option<DateTime<Utc>>,
    total_amount: u64,
    amount_paid: u64,
    payments: Vec<PaymentEntry>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            organization_id: None,
            clinic_id: None,
            patient_id: None,
            treatment_plan_id: None,
            invoice_number: String::new(),
            status: PaymentStatus::Unpaid,
            lines: Vec::new(),
            due_date: None,
            total_amount: 0,
            amount_paid: 0,
            payments: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn treatment_plan_id(&self) -> Option<TreatmentPlanId> {
        self.treatment_plan_id
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn amount_paid(&self) -> u64 {
        self.amount_paid
    }

    /// Invariant: `balance_amount == total_amount - amount_paid`.
    pub fn balance_amount(&self) -> u64 {
        self.total_amount.saturating_sub(self.amount_paid)
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn payments(&self) -> &[PaymentEntry] {
        &self.payments
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&PaymentEntry> {
        self.payments.iter().find(|p| p.payment_id == payment_id)
    }

    /// Invariant: cancelled invoices accept no ledger mutations.
    pub fn can_mutate_ledger(&self) -> bool {
        self.status != PaymentStatus::Cancelled
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub treatment_plan_id: Option<TreatmentPlanId>,
    /// Pre-allocated invoice number (e.g. "INV-202501-0007").
    pub invoice_number: String,
    pub lines: Vec<InvoiceLine>,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPayment {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    /// Server-assigned identity of the new ledger entry.
    pub payment_id: Uuid,
    pub receipt_number: Option<String>,
    /// Payment amount in smallest currency unit.
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub received_by: StaffId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayment {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub payment_id: Uuid,
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemovePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePayment {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub payment_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    AddPayment(AddPayment),
    UpdatePayment(UpdatePayment),
    RemovePayment(RemovePayment),
    CancelInvoice(CancelInvoice),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub treatment_plan_id: Option<TreatmentPlanId>,
    pub invoice_number: String,
    pub lines: Vec<InvoiceLine>,
    pub due_date: DateTime<Utc>,
    pub total_amount: u64,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAdded {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub entry: PaymentEntry,
    pub new_amount_paid: u64,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdated {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub payment_id: Uuid,
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub new_amount_paid: u64,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRemoved {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub payment_id: Uuid,
    /// Amount the removed entry carried.
    pub amount: u64,
    pub new_amount_paid: u64,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub organization_id: OrganizationId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    PaymentAdded(PaymentAdded),
    PaymentUpdated(PaymentUpdated),
    PaymentRemoved(PaymentRemoved),
    InvoiceCancelled(InvoiceCancelled),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "billing.invoice.created",
            InvoiceEvent::PaymentAdded(_) => "billing.invoice.payment_added",
            InvoiceEvent::PaymentUpdated(_) => "billing.invoice.payment_updated",
            InvoiceEvent::PaymentRemoved(_) => "billing.invoice.payment_removed",
            InvoiceEvent::InvoiceCancelled(_) => "billing.invoice.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::PaymentAdded(e) => e.occurred_at,
            InvoiceEvent::PaymentUpdated(e) => e.occurred_at,
            InvoiceEvent::PaymentRemoved(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.organization_id = Some(e.organization_id);
                self.clinic_id = e.clinic_id;
                self.patient_id = Some(e.patient_id);
                self.treatment_plan_id = e.treatment_plan_id;
                self.invoice_number = e.invoice_number.clone();
                self.lines = e.lines.clone();
                self.due_date = Some(e.due_date);
                self.total_amount = e.total_amount;
                self.amount_paid = 0;
                self.payments = Vec::new();
                self.status = e.status;
                self.created = true;
            }
            InvoiceEvent::PaymentAdded(e) => {
                self.payments.push(e.entry.clone());
                self.amount_paid = e.new_amount_paid;
                self.status = e.status;
            }
            InvoiceEvent::PaymentUpdated(e) => {
                if let Some(entry) = self
                    .payments
                    .iter_mut()
                    .find(|p| p.payment_id == e.payment_id)
                {
                    // `received_by` and `paid_at` survive edits.
                    entry.amount = e.amount;
                    entry.method = e.method;
                    entry.transaction_id = e.transaction_id.clone();
                    entry.notes = e.notes.clone();
                }
                self.amount_paid = e.new_amount_paid;
                self.status = e.status;
            }
            InvoiceEvent::PaymentRemoved(e) => {
                self.payments.retain(|p| p.payment_id != e.payment_id);
                self.amount_paid = e.new_amount_paid;
                self.status = e.status;
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = PaymentStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::AddPayment(cmd) => self.handle_add_payment(cmd),
            InvoiceCommand::UpdatePayment(cmd) => self.handle_update_payment(cmd),
            InvoiceCommand::RemovePayment(cmd) => self.handle_remove_payment(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    /// Common preamble for ledger mutations: the invoice must exist, belong
    /// to the caller's organization, and not be cancelled.
    fn ensure_ledger_open(
        &self,
        organization_id: OrganizationId,
        invoice_id: InvoiceId,
    ) -> Result<DateTime<Utc>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("invoice"));
        }
        self.ensure_organization(organization_id)?;
        self.ensure_invoice_id(invoice_id)?;
        if !self.can_mutate_ledger() {
            return Err(DomainError::invariant(
                "cannot modify payments on a cancelled invoice",
            ));
        }
        self.due_date
            .ok_or_else(|| DomainError::invariant("invoice has no due date"))
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if numbering::sequence_of(DocumentKind::Invoice, &cmd.invoice_number).is_none() {
            return Err(DomainError::validation("invoice_number is malformed"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot create an invoice without lines",
            ));
        }

        let mut total: u64 = 0;
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(
                    "invoice line quantity must be positive",
                ));
            }
            if line.unit_price == 0 {
                return Err(DomainError::validation(
                    "invoice line unit_price must be positive",
                ));
            }
            let line_total = (line.quantity as i128)
                .checked_mul(line.unit_price as i128)
                .ok_or_else(|| DomainError::invariant("invoice line amount overflow"))?;
            if line_total <= 0 || line_total > u64::MAX as i128 {
                return Err(DomainError::invariant("invoice line total out of range"));
            }
            total = total
                .checked_add(line_total as u64)
                .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;
        }

        let status = derive_payment_status(0, total, cmd.due_date, cmd.occurred_at);

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            organization_id: cmd.organization_id,
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            patient_id: cmd.patient_id,
            treatment_plan_id: cmd.treatment_plan_id,
            invoice_number: cmd.invoice_number.clone(),
            lines: cmd.lines.clone(),
            due_date: cmd.due_date,
            total_amount: total,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_payment(&self, cmd: &AddPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        let due_date = self.ensure_ledger_open(cmd.organization_id, cmd.invoice_id)?;

        if cmd.amount == 0 {
            return Err(DomainError::invalid_amount("payment amount must be positive"));
        }

        let new_amount_paid = self
            .amount_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invalid_amount("payment total overflow"))?;

        if new_amount_paid > self.total_amount {
            return Err(DomainError::invalid_amount(
                "payment exceeds outstanding balance",
            ));
        }

        let status = derive_payment_status(
            new_amount_paid,
            self.total_amount,
            due_date,
            cmd.occurred_at,
        );

        let entry = PaymentEntry {
            payment_id: cmd.payment_id,
            receipt_number: cmd.receipt_number.clone(),
            amount: cmd.amount,
            paid_at: cmd.occurred_at,
            method: cmd.method,
            transaction_id: cmd.transaction_id.clone(),
            notes: cmd.notes.clone(),
            received_by: cmd.received_by,
        };

        Ok(vec![InvoiceEvent::PaymentAdded(PaymentAdded {
            organization_id: cmd.organization_id,
            invoice_id: cmd.invoice_id,
            entry,
            new_amount_paid,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_payment(&self, cmd: &UpdatePayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        let due_date = self.ensure_ledger_open(cmd.organization_id, cmd.invoice_id)?;

        let existing = self
            .payment(cmd.payment_id)
            .ok_or_else(|| DomainError::not_found("payment"))?;

        if cmd.amount == 0 {
            return Err(DomainError::invalid_amount("payment amount must be positive"));
        }

        let new_amount_paid = self
            .amount_paid
            .checked_sub(existing.amount)
            .and_then(|v| v.checked_add(cmd.amount))
            .ok_or_else(|| DomainError::invalid_amount("payment total overflow"))?;

        if new_amount_paid > self.total_amount {
            return Err(DomainError::invalid_amount(
                "payment exceeds outstanding balance",
            ));
        }

        let status = derive_payment_status(
            new_amount_paid,
            self.total_amount,
            due_date,
            cmd.occurred_at,
        );

        Ok(vec![InvoiceEvent::PaymentUpdated(PaymentUpdated {
            organization_id: cmd.organization_id,
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: cmd.amount,
            method: cmd.method,
            transaction_id: cmd.transaction_id.clone(),
            notes: cmd.notes.clone(),
            new_amount_paid,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_payment(&self, cmd: &RemovePayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        let due_date = self.ensure_ledger_open(cmd.organization_id, cmd.invoice_id)?;

        let existing = self
            .payment(cmd.payment_id)
            .ok_or_else(|| DomainError::not_found("payment"))?;

        let new_amount_paid = self
            .amount_paid
            .checked_sub(existing.amount)
            .ok_or_else(|| DomainError::invalid_amount("ledger underflow"))?;

        let status = derive_payment_status(
            new_amount_paid,
            self.total_amount,
            due_date,
            cmd.occurred_at,
        );

        Ok(vec![InvoiceEvent::PaymentRemoved(PaymentRemoved {
            organization_id: cmd.organization_id,
            invoice_id: cmd.invoice_id,
            payment_id: cmd.payment_id,
            amount: existing.amount,
            new_amount_paid,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("invoice"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.status == PaymentStatus::Cancelled {
            return Err(DomainError::conflict("invoice is already cancelled"));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            organization_id: cmd.organization_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clinicore_core::AggregateId;
    use proptest::prelude::*;

    fn test_org_id() -> OrganizationId {
        OrganizationId::new()
    }

    fn test_invoice_id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn test_patient_id() -> PatientId {
        PatientId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(quantity: i64, unit_price: u64) -> InvoiceLine {
        InvoiceLine {
            line_no: 1,
            description: "Root canal, molar".to_string(),
            procedure_code: Some("D3330".to_string()),
            quantity,
            unit_price,
        }
    }

    struct Fixture {
        organization_id: OrganizationId,
        invoice_id: InvoiceId,
        invoice: Invoice,
    }

    /// Invoice with the given total, due `due_in` relative to now.
    fn created_invoice(total: u64, due_in: Duration) -> Fixture {
        let organization_id = test_org_id();
        let invoice_id = test_invoice_id();
        let mut invoice = Invoice::empty(invoice_id);

        let cmd = CreateInvoice {
            organization_id,
            clinic_id: None,
            invoice_id,
            patient_id: test_patient_id(),
            treatment_plan_id: None,
            invoice_number: "INV-202501-0001".to_string(),
            lines: vec![line(1, total)],
            due_date: test_time() + due_in,
            occurred_at: test_time(),
        };
        let events = invoice
            .handle(&InvoiceCommand::CreateInvoice(cmd))
            .unwrap();
        for e in &events {
            invoice.apply(e);
        }

        Fixture {
            organization_id,
            invoice_id,
            invoice,
        }
    }

    fn add_payment(fx: &mut Fixture, amount: u64) -> Uuid {
        let payment_id = Uuid::now_v7();
        let events = fx
            .invoice
            .handle(&InvoiceCommand::AddPayment(AddPayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id,
                receipt_number: None,
                amount,
                method: PaymentMethod::Cash,
                transaction_id: None,
                notes: None,
                received_by: StaffId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            fx.invoice.apply(e);
        }
        payment_id
    }

    #[test]
    fn create_computes_total_and_starts_unpaid() {
        let fx = created_invoice(9_440, Duration::days(30));
        assert_eq!(fx.invoice.invoice_number(), "INV-202501-0001");
        assert_eq!(fx.invoice.total_amount(), 9_440);
        assert_eq!(fx.invoice.amount_paid(), 0);
        assert_eq!(fx.invoice.balance_amount(), 9_440);
        assert_eq!(fx.invoice.status(), PaymentStatus::Unpaid);
    }

    #[test]
    fn create_with_past_due_date_starts_overdue() {
        let fx = created_invoice(9_440, Duration::days(-3));
        assert_eq!(fx.invoice.status(), PaymentStatus::Overdue);
    }

    #[test]
    fn malformed_invoice_number_is_rejected() {
        let invoice = Invoice::empty(test_invoice_id());
        let cmd = CreateInvoice {
            organization_id: test_org_id(),
            clinic_id: None,
            invoice_id: test_invoice_id(),
            patient_id: test_patient_id(),
            treatment_plan_id: None,
            invoice_number: "RX000001".to_string(),
            lines: vec![line(1, 100)],
            due_date: test_time(),
            occurred_at: test_time(),
        };
        let err = invoice
            .handle(&InvoiceCommand::CreateInvoice(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn partial_then_full_payment_reaches_paid() {
        // Scenario from the billing contract: 9440 total, 5000 then 4440.
        let mut fx = created_invoice(9_440, Duration::days(30));

        add_payment(&mut fx, 5_000);
        assert_eq!(fx.invoice.amount_paid(), 5_000);
        assert_eq!(fx.invoice.balance_amount(), 4_440);
        assert_eq!(fx.invoice.status(), PaymentStatus::PartiallyPaid);

        add_payment(&mut fx, 4_440);
        assert_eq!(fx.invoice.amount_paid(), 9_440);
        assert_eq!(fx.invoice.balance_amount(), 0);
        assert_eq!(fx.invoice.status(), PaymentStatus::Paid);
    }

    #[test]
    fn exact_payment_is_paid_even_past_due_date() {
        let mut fx = created_invoice(2_000, Duration::days(-10));
        assert_eq!(fx.invoice.status(), PaymentStatus::Overdue);

        add_payment(&mut fx, 2_000);
        assert_eq!(fx.invoice.status(), PaymentStatus::Paid);
        assert_eq!(fx.invoice.balance_amount(), 0);
    }

    #[test]
    fn zero_amount_payment_is_rejected() {
        let fx = created_invoice(1_000, Duration::days(30));
        let err = fx
            .invoice
            .handle(&InvoiceCommand::AddPayment(AddPayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: Uuid::now_v7(),
                receipt_number: None,
                amount: 0,
                method: PaymentMethod::Card,
                transaction_id: None,
                notes: None,
                received_by: StaffId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn overpayment_is_rejected_and_state_unchanged() {
        let mut fx = created_invoice(1_000, Duration::days(30));
        add_payment(&mut fx, 600);

        let err = fx
            .invoice
            .handle(&InvoiceCommand::AddPayment(AddPayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: Uuid::now_v7(),
                receipt_number: None,
                amount: 500,
                method: PaymentMethod::Cash,
                transaction_id: None,
                notes: None,
                received_by: StaffId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
        assert_eq!(fx.invoice.amount_paid(), 600);
        assert_eq!(fx.invoice.balance_amount(), 400);
    }

    #[test]
    fn update_payment_shifts_amount_paid() {
        // 10000 total, one 1000 payment and one 2000 payment; editing the
        // 2000 entry to 3000 moves paid 3000 -> 4000, balance 7000 -> 6000.
        let mut fx = created_invoice(10_000, Duration::days(30));
        add_payment(&mut fx, 1_000);
        let target = add_payment(&mut fx, 2_000);
        assert_eq!(fx.invoice.amount_paid(), 3_000);
        assert_eq!(fx.invoice.balance_amount(), 7_000);

        let events = fx
            .invoice
            .handle(&InvoiceCommand::UpdatePayment(UpdatePayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: target,
                amount: 3_000,
                method: PaymentMethod::Card,
                transaction_id: Some("tx-991".to_string()),
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        fx.invoice.apply(&events[0]);

        assert_eq!(fx.invoice.amount_paid(), 4_000);
        assert_eq!(fx.invoice.balance_amount(), 6_000);
        assert_eq!(fx.invoice.status(), PaymentStatus::PartiallyPaid);
    }

    #[test]
    fn update_keeps_received_by_and_paid_at() {
        let mut fx = created_invoice(10_000, Duration::days(30));
        let target = add_payment(&mut fx, 2_000);
        let before = fx.invoice.payment(target).unwrap().clone();

        let events = fx
            .invoice
            .handle(&InvoiceCommand::UpdatePayment(UpdatePayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: target,
                amount: 2_500,
                method: PaymentMethod::BankTransfer,
                transaction_id: Some("tx-1".to_string()),
                notes: Some("adjusted".to_string()),
                occurred_at: test_time() + Duration::hours(1),
            }))
            .unwrap();
        fx.invoice.apply(&events[0]);

        let after = fx.invoice.payment(target).unwrap();
        assert_eq!(after.received_by, before.received_by);
        assert_eq!(after.paid_at, before.paid_at);
        assert_eq!(after.amount, 2_500);
        assert_eq!(after.method, PaymentMethod::BankTransfer);
        assert_eq!(after.transaction_id.as_deref(), Some("tx-1"));
    }

    #[test]
    fn unknown_payment_is_distinct_from_unknown_invoice() {
        let fx = created_invoice(1_000, Duration::days(30));
        let err = fx
            .invoice
            .handle(&InvoiceCommand::UpdatePayment(UpdatePayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: Uuid::now_v7(),
                amount: 100,
                method: PaymentMethod::Cash,
                transaction_id: None,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("payment"));

        // An uncreated invoice reports the invoice itself as missing.
        let empty = Invoice::empty(test_invoice_id());
        let err = empty
            .handle(&InvoiceCommand::RemovePayment(RemovePayment {
                organization_id: fx.organization_id,
                invoice_id: empty.id_typed(),
                payment_id: Uuid::now_v7(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("invoice"));
    }

    #[test]
    fn remove_payment_round_trips_the_ledger() {
        let mut fx = created_invoice(9_440, Duration::days(30));
        add_payment(&mut fx, 5_000);
        let paid_before = fx.invoice.amount_paid();
        let balance_before = fx.invoice.balance_amount();
        let status_before = fx.invoice.status();

        let target = add_payment(&mut fx, 1_200);
        let events = fx
            .invoice
            .handle(&InvoiceCommand::RemovePayment(RemovePayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: target,
                occurred_at: test_time(),
            }))
            .unwrap();
        fx.invoice.apply(&events[0]);

        assert_eq!(fx.invoice.amount_paid(), paid_before);
        assert_eq!(fx.invoice.balance_amount(), balance_before);
        assert_eq!(fx.invoice.status(), status_before);
        assert!(fx.invoice.payment(target).is_none());
    }

    #[test]
    fn overdue_applies_uniformly_on_remove() {
        // Paid in full before the due date, then the payment is removed after
        // the due date has passed: the uniform rule says the invoice is now
        // overdue, not merely unpaid.
        let mut fx = created_invoice(1_000, Duration::days(7));
        let target = add_payment(&mut fx, 1_000);
        assert_eq!(fx.invoice.status(), PaymentStatus::Paid);

        let events = fx
            .invoice
            .handle(&InvoiceCommand::RemovePayment(RemovePayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: target,
                occurred_at: test_time() + Duration::days(30),
            }))
            .unwrap();
        fx.invoice.apply(&events[0]);
        assert_eq!(fx.invoice.status(), PaymentStatus::Overdue);
        assert_eq!(fx.invoice.amount_paid(), 0);
    }

    #[test]
    fn cancelled_invoice_rejects_ledger_mutations() {
        let mut fx = created_invoice(1_000, Duration::days(30));
        let target = add_payment(&mut fx, 400);

        let events = fx
            .invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                reason: Some("duplicate".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        fx.invoice.apply(&events[0]);
        assert_eq!(fx.invoice.status(), PaymentStatus::Cancelled);

        let err = fx
            .invoice
            .handle(&InvoiceCommand::RemovePayment(RemovePayment {
                organization_id: fx.organization_id,
                invoice_id: fx.invoice_id,
                payment_id: target,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn payments_are_append_ordered() {
        let mut fx = created_invoice(10_000, Duration::days(30));
        let first = add_payment(&mut fx, 1_000);
        let second = add_payment(&mut fx, 2_000);
        let third = add_payment(&mut fx, 3_000);

        let ids: Vec<Uuid> = fx.invoice.payments().iter().map(|p| p.payment_id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn status_derivation_is_idempotent() {
        let due = test_time() + Duration::days(1);
        let now = test_time();
        for (paid, total) in [(0, 100), (40, 100), (100, 100), (150, 100)] {
            let a = derive_payment_status(paid, total, due, now);
            let b = derive_payment_status(paid, total, due, now);
            assert_eq!(a, b);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after payments summing to P against total T (P <= T),
        /// `amount_paid == P` and `balance_amount == T - P`, and the status
        /// matches the derivation rule.
        #[test]
        fn ledger_arithmetic_holds_for_any_payment_sequence(
            amounts in prop::collection::vec(1u64..50_000u64, 1..20),
            headroom in 0u64..50_000u64,
        ) {
            let paid_sum: u64 = amounts.iter().sum();
            let total = paid_sum + headroom;
            let mut fx = created_invoice(total, Duration::days(30));

            for amount in &amounts {
                add_payment(&mut fx, *amount);
            }

            prop_assert_eq!(fx.invoice.amount_paid(), paid_sum);
            prop_assert_eq!(fx.invoice.balance_amount(), total - paid_sum);
            prop_assert_eq!(fx.invoice.payments().len(), amounts.len());

            let expected = if paid_sum >= total {
                PaymentStatus::Paid
            } else {
                PaymentStatus::PartiallyPaid
            };
            prop_assert_eq!(fx.invoice.status(), expected);
        }

        /// Property: adding then removing a payment restores paid/balance.
        #[test]
        fn add_then_remove_is_an_identity(
            base in 0u64..10_000u64,
            amount in 1u64..10_000u64,
        ) {
            let total = base + amount + 5_000;
            let mut fx = created_invoice(total, Duration::days(30));
            if base > 0 {
                add_payment(&mut fx, base);
            }
            let paid_before = fx.invoice.amount_paid();
            let balance_before = fx.invoice.balance_amount();

            let target = add_payment(&mut fx, amount);
            let events = fx.invoice
                .handle(&InvoiceCommand::RemovePayment(RemovePayment {
                    organization_id: fx.organization_id,
                    invoice_id: fx.invoice_id,
                    payment_id: target,
                    occurred_at: test_time(),
                }))
                .unwrap();
            fx.invoice.apply(&events[0]);

            prop_assert_eq!(fx.invoice.amount_paid(), paid_before);
            prop_assert_eq!(fx.invoice.balance_amount(), balance_before);
        }
    }
}
