use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use clinicore_core::{Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, OrganizationId};
use clinicore_events::Event;

/// Patient identifier (organization-scoped via `organization_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub AggregateId);

impl PatientId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PatientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Patient record status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientStatus {
    Active,
    Archived,
}

/// Contact information for a patient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Aggregate root: Patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    id: PatientId,
    organization_id: Option<OrganizationId>,
    clinic_id: Option<ClinicId>,
    name: String,
    date_of_birth: Option<NaiveDate>,
    contact: ContactInfo,
    status: PatientStatus,
    version: u64,
    created: bool,
}

impl Patient {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PatientId) -> Self {
        Self {
            id,
            organization_id: None,
            clinic_id: None,
            name: String::new(),
            date_of_birth: None,
            contact: ContactInfo::default(),
            status: PatientStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PatientId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date_of_birth(&self) -> Option<NaiveDate> {
        self.date_of_birth
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn status(&self) -> PatientStatus {
        self.status
    }

    /// Invariant helper: whether records can still be created against this
    /// patient. Archived patients cannot transact.
    pub fn can_transact(&self) -> bool {
        self.status == PatientStatus::Active
    }
}

impl AggregateRoot for Patient {
    type Id = PatientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterPatient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPatient {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub patient_id: PatientId,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub organization_id: OrganizationId,
    pub patient_id: PatientId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    /// Optional new contact info (if None, keep existing).
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchivePatient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePatient {
    pub organization_id: OrganizationId,
    pub patient_id: PatientId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientCommand {
    RegisterPatient(RegisterPatient),
    UpdateDetails(UpdateDetails),
    ArchivePatient(ArchivePatient),
}

/// Event: PatientRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRegistered {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub patient_id: PatientId,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DetailsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdated {
    pub organization_id: OrganizationId,
    pub patient_id: PatientId,
    pub name: Option<String>,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PatientArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientArchived {
    pub organization_id: OrganizationId,
    pub patient_id: PatientId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientEvent {
    PatientRegistered(PatientRegistered),
    DetailsUpdated(DetailsUpdated),
    PatientArchived(PatientArchived),
}

impl Event for PatientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PatientEvent::PatientRegistered(_) => "patients.patient.registered",
            PatientEvent::DetailsUpdated(_) => "patients.patient.details_updated",
            PatientEvent::PatientArchived(_) => "patients.patient.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PatientEvent::PatientRegistered(e) => e.occurred_at,
            PatientEvent::DetailsUpdated(e) => e.occurred_at,
            PatientEvent::PatientArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Patient {
    type Command = PatientCommand;
    type Event = PatientEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PatientEvent::PatientRegistered(e) => {
                self.id = e.patient_id;
                self.organization_id = Some(e.organization_id);
                self.clinic_id = e.clinic_id;
                self.name = e.name.clone();
                self.date_of_birth = e.date_of_birth;
                self.contact = e.contact.clone();
                self.status = PatientStatus::Active;
                self.created = true;
            }
            PatientEvent::DetailsUpdated(e) => {
                if let Some(name) = &e.name {
                    self.name = name.clone();
                }
                if let Some(contact) = &e.contact {
                    self.contact = contact.clone();
                }
            }
            PatientEvent::PatientArchived(_) => {
                self.status = PatientStatus::Archived;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PatientCommand::RegisterPatient(cmd) => self.handle_register(cmd),
            PatientCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            PatientCommand::ArchivePatient(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Patient {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_patient_id(&self, patient_id: PatientId) -> Result<(), DomainError> {
        if self.id != patient_id {
            return Err(DomainError::invariant("patient_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterPatient) -> Result<Vec<PatientEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("patient already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![PatientEvent::PatientRegistered(PatientRegistered {
            organization_id: cmd.organization_id,
            clinic_id: cmd.clinic_id,
            patient_id: cmd.patient_id,
            name: cmd.name.clone(),
            date_of_birth: cmd.date_of_birth,
            contact: cmd.contact.clone().unwrap_or_default(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateDetails) -> Result<Vec<PatientEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("patient"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_patient_id(cmd.patient_id)?;

        if self.status == PatientStatus::Archived {
            return Err(DomainError::invariant("cannot update an archived patient"));
        }

        if let Some(name) = &cmd.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        if cmd.name.is_none() && cmd.contact.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }

        Ok(vec![PatientEvent::DetailsUpdated(DetailsUpdated {
            organization_id: cmd.organization_id,
            patient_id: cmd.patient_id,
            name: cmd.name.clone(),
            contact: cmd.contact.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchivePatient) -> Result<Vec<PatientEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("patient"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_patient_id(cmd.patient_id)?;

        if self.status == PatientStatus::Archived {
            return Err(DomainError::conflict("patient is already archived"));
        }

        Ok(vec![PatientEvent::PatientArchived(PatientArchived {
            organization_id: cmd.organization_id,
            patient_id: cmd.patient_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicore_core::AggregateId;

    fn test_org_id() -> OrganizationId {
        OrganizationId::new()
    }

    fn test_patient_id() -> PatientId {
        PatientId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered_patient(organization_id: OrganizationId, patient_id: PatientId) -> Patient {
        let mut patient = Patient::empty(patient_id);
        let cmd = RegisterPatient {
            organization_id,
            clinic_id: None,
            patient_id,
            name: "Maryam Haque".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 2),
            contact: None,
            occurred_at: test_time(),
        };
        let events = patient
            .handle(&PatientCommand::RegisterPatient(cmd))
            .unwrap();
        for e in &events {
            patient.apply(e);
        }
        patient
    }

    #[test]
    fn register_patient_emits_registered_event() {
        let organization_id = test_org_id();
        let patient_id = test_patient_id();
        let patient = Patient::empty(patient_id);

        let cmd = RegisterPatient {
            organization_id,
            clinic_id: None,
            patient_id,
            name: "Maryam Haque".to_string(),
            date_of_birth: None,
            contact: Some(ContactInfo {
                email: Some("maryam@example.com".to_string()),
                phone: None,
                address: None,
            }),
            occurred_at: test_time(),
        };

        let events = patient
            .handle(&PatientCommand::RegisterPatient(cmd))
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            PatientEvent::PatientRegistered(e) => {
                assert_eq!(e.organization_id, organization_id);
                assert_eq!(e.patient_id, patient_id);
                assert_eq!(e.name, "Maryam Haque");
                assert_eq!(e.contact.email.as_deref(), Some("maryam@example.com"));
            }
            _ => panic!("Expected PatientRegistered event"),
        }
    }

    #[test]
    fn blank_name_is_rejected() {
        let patient = Patient::empty(test_patient_id());
        let cmd = RegisterPatient {
            organization_id: test_org_id(),
            clinic_id: None,
            patient_id: test_patient_id(),
            name: "   ".to_string(),
            date_of_birth: None,
            contact: None,
            occurred_at: test_time(),
        };

        let err = patient
            .handle(&PatientCommand::RegisterPatient(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn archived_patient_rejects_updates() {
        let organization_id = test_org_id();
        let patient_id = test_patient_id();
        let mut patient = registered_patient(organization_id, patient_id);

        let events = patient
            .handle(&PatientCommand::ArchivePatient(ArchivePatient {
                organization_id,
                patient_id,
                reason: Some("moved away".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        patient.apply(&events[0]);
        assert_eq!(patient.status(), PatientStatus::Archived);
        assert!(!patient.can_transact());

        let err = patient
            .handle(&PatientCommand::UpdateDetails(UpdateDetails {
                organization_id,
                patient_id,
                name: Some("New Name".to_string()),
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn organization_mismatch_is_rejected() {
        let organization_id = test_org_id();
        let patient_id = test_patient_id();
        let patient = registered_patient(organization_id, patient_id);

        let err = patient
            .handle(&PatientCommand::UpdateDetails(UpdateDetails {
                organization_id: test_org_id(),
                patient_id,
                name: Some("Other Org".to_string()),
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn update_with_nothing_to_change_is_rejected() {
        let organization_id = test_org_id();
        let patient_id = test_patient_id();
        let patient = registered_patient(organization_id, patient_id);

        let err = patient
            .handle(&PatientCommand::UpdateDetails(UpdateDetails {
                organization_id,
                patient_id,
                name: None,
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
