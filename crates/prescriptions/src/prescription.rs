use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicore_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DocumentKind, DomainError, OrganizationId,
    StaffId, numbering,
};
use clinicore_events::Event;
use clinicore_patients::PatientId;

/// Prescription identifier (organization-scoped via `organization_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrescriptionId(pub AggregateId);

impl PrescriptionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PrescriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Prescription status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrescriptionStatus {
    Issued,
    Dispensed,
    Cancelled,
}

/// One prescribed medication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionItem {
    pub drug: String,
    pub dosage: String,
    /// e.g. "twice daily".
    pub frequency: String,
    pub duration_days: u32,
    pub instructions: Option<String>,
}

/// Aggregate root: Prescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prescription {
    id: PrescriptionId,
    organization_id: Option<OrganizationId>,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    prescribed_by: Option<StaffId>,
    rx_number: String,
    items: Vec<PrescriptionItem>,
    status: PrescriptionStatus,
    version: u64,
    created: bool,
}

impl Prescription {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PrescriptionId) -> Self {
        Self {
            id,
            organization_id: None,
            clinic_id: None,
            patient_id: None,
            prescribed_by: None,
            rx_number: String::new(),
            items: Vec::new(),
            status: PrescriptionStatus::Issued,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PrescriptionId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn rx_number(&self) -> &str {
        &self.rx_number
    }

    pub fn items(&self) -> &[PrescriptionItem] {
        &self.items
    }

    pub fn status(&self) -> PrescriptionStatus {
        self.status
    }
}

impl AggregateRoot for Prescription {
    type Id = PrescriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssuePrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePrescription {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub prescribed_by: StaffId,
    /// Pre-allocated running number (e.g. "RX000042").
    pub rx_number: String,
    pub items: Vec<PrescriptionItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispensePrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensePrescription {
    pub organization_id: OrganizationId,
    pub prescription_id: PrescriptionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPrescription {
    pub organization_id: OrganizationId,
    pub prescription_id: PrescriptionId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionCommand {
    IssuePrescription(IssuePrescription),
    DispensePrescription(DispensePrescription),
    CancelPrescription(CancelPrescription),
}

/// Event: PrescriptionIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionIssued {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub prescribed_by: StaffId,
    pub rx_number: String,
    pub items: Vec<PrescriptionItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionDispensed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionDispensed {
    pub organization_id: OrganizationId,
    pub prescription_id: PrescriptionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionCancelled {
    pub organization_id: OrganizationId,
    pub prescription_id: PrescriptionId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionEvent {
    PrescriptionIssued(PrescriptionIssued),
    PrescriptionDispensed(PrescriptionDispensed),
    PrescriptionCancelled(PrescriptionCancelled),
}

impl Event for PrescriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PrescriptionEvent::PrescriptionIssued(_) => "prescriptions.prescription.issued",
            PrescriptionEvent::PrescriptionDispensed(_) => "prescriptions.prescription.dispensed",
            PrescriptionEvent::PrescriptionCancelled(_) => "prescriptions.prescription.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PrescriptionEvent::PrescriptionIssued(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionDispensed(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Prescription {
    type Command = PrescriptionCommand;
    type Event = PrescriptionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PrescriptionEvent::PrescriptionIssued(e) => {
                self.id = e.prescription_id;
                self.organization_id = Some(e.organization_id);
                self.clinic_id = e.clinic_id;
                self.patient_id = Some(e.patient_id);
                self.prescribed_by = Some(e.prescribed_by);
                self.rx_number = e.rx_number.clone();
                self.items = e.items.clone();
                self.status = PrescriptionStatus::Issued;
                self.created = true;
            }
            PrescriptionEvent::PrescriptionDispensed(_) => {
                self.status = PrescriptionStatus::Dispensed;
            }
            PrescriptionEvent::PrescriptionCancelled(_) => {
                self.status = PrescriptionStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PrescriptionCommand::IssuePrescription(cmd) => self.handle_issue(cmd),
            PrescriptionCommand::DispensePrescription(cmd) => self.handle_dispense(cmd),
            PrescriptionCommand::CancelPrescription(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Prescription {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_prescription_id(&self, prescription_id: PrescriptionId) -> Result<(), DomainError> {
        if self.id != prescription_id {
            return Err(DomainError::invariant("prescription_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(
        &self,
        organization_id: OrganizationId,
        prescription_id: PrescriptionId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("prescription"));
        }
        self.ensure_organization(organization_id)?;
        self.ensure_prescription_id(prescription_id)
    }

    fn handle_issue(&self, cmd: &IssuePrescription) -> Result<Vec<PrescriptionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("prescription already exists"));
        }
        if numbering::sequence_of(DocumentKind::Prescription, &cmd.rx_number).is_none() {
            return Err(DomainError::validation("rx_number is malformed"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "cannot issue a prescription without items",
            ));
        }
        for item in &cmd.items {
            if item.drug.trim().is_empty() || item.dosage.trim().is_empty() {
                return Err(DomainError::validation("drug and dosage are required"));
            }
            if item.duration_days == 0 {
                return Err(DomainError::validation("duration_days must be positive"));
            }
        }

        Ok(vec![PrescriptionEvent::PrescriptionIssued(PrescriptionIssued {
            organization_id: cmd.organization_id,
            clinic_id: cmd.clinic_id,
            prescription_id: cmd.prescription_id,
            patient_id: cmd.patient_id,
            prescribed_by: cmd.prescribed_by,
            rx_number: cmd.rx_number.clone(),
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispense(
        &self,
        cmd: &DispensePrescription,
    ) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.organization_id, cmd.prescription_id)?;

        if self.status != PrescriptionStatus::Issued {
            return Err(DomainError::invariant(
                "only an issued prescription can be dispensed",
            ));
        }

        Ok(vec![PrescriptionEvent::PrescriptionDispensed(PrescriptionDispensed {
            organization_id: cmd.organization_id,
            prescription_id: cmd.prescription_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelPrescription,
    ) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.organization_id, cmd.prescription_id)?;

        if self.status == PrescriptionStatus::Dispensed {
            return Err(DomainError::invariant(
                "a dispensed prescription cannot be cancelled",
            ));
        }
        if self.status == PrescriptionStatus::Cancelled {
            return Err(DomainError::conflict("prescription is already cancelled"));
        }

        Ok(vec![PrescriptionEvent::PrescriptionCancelled(PrescriptionCancelled {
            organization_id: cmd.organization_id,
            prescription_id: cmd.prescription_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
