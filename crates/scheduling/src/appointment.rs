use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicore_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, OrganizationId, StaffId,
};
use clinicore_events::Event;
use clinicore_patients::PatientId;

/// Appointment identifier (organization-scoped via `organization_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub AggregateId);

impl AppointmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Appointment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

/// Aggregate root: Appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    id: AppointmentId,
    organization_id: Option<OrganizationId>,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    dentist_id: Option<StaffId>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    reason: String,
    status: AppointmentStatus,
    version: u64,
    created: bool,
}

impl Appointment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AppointmentId) -> Self {
        Self {
            id,
            organization_id: None,
            clinic_id: None,
            patient_id: None,
            dentist_id: None,
            starts_at: None,
            ends_at: None,
            reason: String::new(),
            status: AppointmentStatus::Scheduled,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AppointmentId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.starts_at
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    /// Completed and cancelled appointments are terminal.
    pub fn is_open(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

impl AggregateRoot for Appointment {
    type Id = AppointmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleAppointment {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub dentist_id: StaffId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RescheduleAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleAppointment {
    pub organization_id: OrganizationId,
    pub appointment_id: AppointmentId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteAppointment {
    pub organization_id: OrganizationId,
    pub appointment_id: AppointmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAppointment {
    pub organization_id: OrganizationId,
    pub appointment_id: AppointmentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentCommand {
    ScheduleAppointment(ScheduleAppointment),
    RescheduleAppointment(RescheduleAppointment),
    CompleteAppointment(CompleteAppointment),
    CancelAppointment(CancelAppointment),
}

/// Event: AppointmentScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentScheduled {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub appointment_id: AppointmentId,
    pub patient_id: PatientId,
    pub dentist_id: StaffId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRescheduled {
    pub organization_id: OrganizationId,
    pub appointment_id: AppointmentId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentCompleted {
    pub organization_id: OrganizationId,
    pub appointment_id: AppointmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AppointmentCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentCancelled {
    pub organization_id: OrganizationId,
    pub appointment_id: AppointmentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    AppointmentScheduled(AppointmentScheduled),
    AppointmentRescheduled(AppointmentRescheduled),
    AppointmentCompleted(AppointmentCompleted),
    AppointmentCancelled(AppointmentCancelled),
}

impl Event for AppointmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AppointmentEvent::AppointmentScheduled(_) => "scheduling.appointment.scheduled",
            AppointmentEvent::AppointmentRescheduled(_) => "scheduling.appointment.rescheduled",
            AppointmentEvent::AppointmentCompleted(_) => "scheduling.appointment.completed",
            AppointmentEvent::AppointmentCancelled(_) => "scheduling.appointment.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AppointmentEvent::AppointmentScheduled(e) => e.occurred_at,
            AppointmentEvent::AppointmentRescheduled(e) => e.occurred_at,
            AppointmentEvent::AppointmentCompleted(e) => e.occurred_at,
            AppointmentEvent::AppointmentCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Appointment {
    type Command = AppointmentCommand;
    type Event = AppointmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AppointmentEvent::AppointmentScheduled(e) => {
                self.id = e.appointment_id;
                self.organization_id = Some(e.organization_id);
                self.clinic_id = e.clinic_id;
                self.patient_id = Some(e.patient_id);
                self.dentist_id = Some(e.dentist_id);
                self.starts_at = Some(e.starts_at);
                self.ends_at = Some(e.ends_at);
                self.reason = e.reason.clone();
                self.status = AppointmentStatus::Scheduled;
                self.created = true;
            }
            AppointmentEvent::AppointmentRescheduled(e) => {
                self.starts_at = Some(e.starts_at);
                self.ends_at = Some(e.ends_at);
            }
            AppointmentEvent::AppointmentCompleted(_) => {
                self.status = AppointmentStatus::Completed;
            }
            AppointmentEvent::AppointmentCancelled(_) => {
                self.status = AppointmentStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AppointmentCommand::ScheduleAppointment(cmd) => self.handle_schedule(cmd),
            AppointmentCommand::RescheduleAppointment(cmd) => self.handle_reschedule(cmd),
            AppointmentCommand::CompleteAppointment(cmd) => self.handle_complete(cmd),
            AppointmentCommand::CancelAppointment(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Appointment {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_appointment_id(&self, appointment_id: AppointmentId) -> Result<(), DomainError> {
        if self.id != appointment_id {
            return Err(DomainError::invariant("appointment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(
        &self,
        organization_id: OrganizationId,
        appointment_id: AppointmentId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("appointment"));
        }
        self.ensure_organization(organization_id)?;
        self.ensure_appointment_id(appointment_id)?;
        if !self.is_open() {
            return Err(DomainError::invariant(
                "completed or cancelled appointments cannot change",
            ));
        }
        Ok(())
    }

    fn check_window(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<(), DomainError> {
        if ends_at <= starts_at {
            return Err(DomainError::validation("ends_at must be after starts_at"));
        }
        Ok(())
    }

    fn handle_schedule(&self, cmd: &ScheduleAppointment) -> Result<Vec<AppointmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("appointment already exists"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("reason cannot be empty"));
        }
        Self::check_window(cmd.starts_at, cmd.ends_at)?;

        Ok(vec![AppointmentEvent::AppointmentScheduled(AppointmentScheduled {
            organization_id: cmd.organization_id,
            clinic_id: cmd.clinic_id,
            appointment_id: cmd.appointment_id,
            patient_id: cmd.patient_id,
            dentist_id: cmd.dentist_id,
            starts_at: cmd.starts_at,
            ends_at: cmd.ends_at,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reschedule(
        &self,
        cmd: &RescheduleAppointment,
    ) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.appointment_id)?;
        Self::check_window(cmd.starts_at, cmd.ends_at)?;

        Ok(vec![AppointmentEvent::AppointmentRescheduled(AppointmentRescheduled {
            organization_id: cmd.organization_id,
            appointment_id: cmd.appointment_id,
            starts_at: cmd.starts_at,
            ends_at: cmd.ends_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(
        &self,
        cmd: &CompleteAppointment,
    ) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.appointment_id)?;

        Ok(vec![AppointmentEvent::AppointmentCompleted(AppointmentCompleted {
            organization_id: cmd.organization_id,
            appointment_id: cmd.appointment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelAppointment) -> Result<Vec<AppointmentEvent>, DomainError> {
        self.ensure_open(cmd.organization_id, cmd.appointment_id)?;

        Ok(vec![AppointmentEvent::AppointmentCancelled(AppointmentCancelled {
            organization_id: cmd.organization_id,
            appointment_id: cmd.appointment_id,
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

    fn test_org_id() -> OrganizationId {
        OrganizationId::new()
    }

    fn test_appointment_id() -> AppointmentId {
        AppointmentId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn scheduled(organization_id: OrganizationId, appointment_id: AppointmentId) -> Appointment {
        let mut appt = Appointment::empty(appointment_id);
        let start = test_time() + Duration::days(1);
        let events = appt
            .handle(&AppointmentCommand::ScheduleAppointment(ScheduleAppointment {
                organization_id,
                clinic_id: None,
                appointment_id,
                patient_id: PatientId::new(AggregateId::new()),
                dentist_id: StaffId::new(),
                starts_at: start,
                ends_at: start + Duration::minutes(30),
                reason: "Checkup".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            appt.apply(e);
        }
        appt
    }

    #[test]
    fn schedule_rejects_inverted_window() {
        let appt = Appointment::empty(test_appointment_id());
        let start = test_time();
        let err = appt
            .handle(&AppointmentCommand::ScheduleAppointment(ScheduleAppointment {
                organization_id: test_org_id(),
                clinic_id: None,
                appointment_id: test_appointment_id(),
                patient_id: PatientId::new(AggregateId::new()),
                dentist_id: StaffId::new(),
                starts_at: start,
                ends_at: start - Duration::minutes(30),
                reason: "Checkup".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reschedule_moves_the_window() {
        let organization_id = test_org_id();
        let appointment_id = test_appointment_id();
        let mut appt = scheduled(organization_id, appointment_id);

        let new_start = test_time() + Duration::days(3);
        let events = appt
            .handle(&AppointmentCommand::RescheduleAppointment(RescheduleAppointment {
                organization_id,
                appointment_id,
                starts_at: new_start,
                ends_at: new_start + Duration::minutes(45),
                occurred_at: test_time(),
            }))
            .unwrap();
        appt.apply(&events[0]);

        assert_eq!(appt.starts_at(), Some(new_start));
        assert_eq!(appt.status(), AppointmentStatus::Scheduled);
    }

    #[test]
    fn cancelled_appointment_is_terminal() {
        let organization_id = test_org_id();
        let appointment_id = test_appointment_id();
        let mut appt = scheduled(organization_id, appointment_id);

        let events = appt
            .handle(&AppointmentCommand::CancelAppointment(CancelAppointment {
                organization_id,
                appointment_id,
                reason: Some("patient request".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        appt.apply(&events[0]);
        assert_eq!(appt.status(), AppointmentStatus::Cancelled);

        let start = test_time() + Duration::days(2);
        let err = appt
            .handle(&AppointmentCommand::RescheduleAppointment(RescheduleAppointment {
                organization_id,
                appointment_id,
                starts_at: start,
                ends_at: start + Duration::minutes(30),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn complete_marks_the_appointment_done() {
        let organization_id = test_org_id();
        let appointment_id = test_appointment_id();
        let mut appt = scheduled(organization_id, appointment_id);

        let events = appt
            .handle(&AppointmentCommand::CompleteAppointment(CompleteAppointment {
                organization_id,
                appointment_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        appt.apply(&events[0]);
        assert_eq!(appt.status(), AppointmentStatus::Completed);
        assert!(!appt.is_open());
    }
}
