use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinicore_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DomainError, OrganizationId,
};
use clinicore_events::Event;
use clinicore_patients::PatientId;

/// Treatment plan identifier (organization-scoped via `organization_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreatmentPlanId(pub AggregateId);

impl TreatmentPlanId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TreatmentPlanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Treatment plan status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentPlanStatus {
    Proposed,
    Accepted,
    Invoiced,
    Completed,
}

/// One planned procedure: code, description, optional tooth, cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedProcedure {
    pub line_no: u32,
    /// Procedure code (e.g. "D2740").
    pub code: String,
    pub description: String,
    /// Tooth notation, when the procedure targets a specific tooth.
    pub tooth: Option<String>,
    /// Cost in smallest currency unit (e.g., cents).
    pub cost: u64,
}

/// Aggregate root: TreatmentPlan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreatmentPlan {
    id: TreatmentPlanId,
    organization_id: Option<OrganizationId>,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    plan_number: String,
    status: TreatmentPlanStatus,
    procedures: Vec<PlannedProcedure>,
    version: u64,
    created: bool,
}

impl TreatmentPlan {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TreatmentPlanId) -> Self {
        Self {
            id,
            organization_id: None,
            clinic_id: None,
            patient_id: None,
            plan_number: String::new(),
            status: TreatmentPlanStatus::Proposed,
            procedures: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TreatmentPlanId {
        self.id
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn plan_number(&self) -> &str {
        &self.plan_number
    }

    pub fn status(&self) -> TreatmentPlanStatus {
        self.status
    }

    pub fn procedures(&self) -> &[PlannedProcedure] {
        &self.procedures
    }

    /// Total planned cost across procedures.
    pub fn total_cost(&self) -> u64 {
        self.procedures.iter().map(|p| p.cost).sum()
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, TreatmentPlanStatus::Proposed)
    }

    pub fn is_invoice_allowed(&self) -> bool {
        matches!(self.status, TreatmentPlanStatus::Accepted)
    }
}

impl AggregateRoot for TreatmentPlan {
    type Id = TreatmentPlanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ProposePlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposePlan {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub plan_id: TreatmentPlanId,
    pub patient_id: PatientId,
    /// Pre-allocated plan number (e.g. "TP-202501-0003").
    pub plan_number: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddProcedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddProcedure {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub code: String,
    pub description: String,
    pub tooth: Option<String>,
    pub cost: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptPlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptPlan {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkInvoiced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInvoiced {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompletePlan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePlan {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentPlanCommand {
    ProposePlan(ProposePlan),
    AddProcedure(AddProcedure),
    AcceptPlan(AcceptPlan),
    MarkInvoiced(MarkInvoiced),
    CompletePlan(CompletePlan),
}

/// Event: PlanProposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProposed {
    pub organization_id: OrganizationId,
    pub clinic_id: Option<ClinicId>,
    pub plan_id: TreatmentPlanId,
    pub patient_id: PatientId,
    pub plan_number: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcedureAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureAdded {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub procedure: PlannedProcedure,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PlanAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAccepted {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PlanInvoiced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInvoiced {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PlanCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCompleted {
    pub organization_id: OrganizationId,
    pub plan_id: TreatmentPlanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreatmentPlanEvent {
    PlanProposed(PlanProposed),
    ProcedureAdded(ProcedureAdded),
    PlanAccepted(PlanAccepted),
    PlanInvoiced(PlanInvoiced),
    PlanCompleted(PlanCompleted),
}

impl Event for TreatmentPlanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TreatmentPlanEvent::PlanProposed(_) => "treatments.plan.proposed",
            TreatmentPlanEvent::ProcedureAdded(_) => "treatments.plan.procedure_added",
            TreatmentPlanEvent::PlanAccepted(_) => "treatments.plan.accepted",
            TreatmentPlanEvent::PlanInvoiced(_) => "treatments.plan.invoiced",
            TreatmentPlanEvent::PlanCompleted(_) => "treatments.plan.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TreatmentPlanEvent::PlanProposed(e) => e.occurred_at,
            TreatmentPlanEvent::ProcedureAdded(e) => e.occurred_at,
            TreatmentPlanEvent::PlanAccepted(e) => e.occurred_at,
            TreatmentPlanEvent::PlanInvoiced(e) => e.occurred_at,
            TreatmentPlanEvent::PlanCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TreatmentPlan {
    type Command = TreatmentPlanCommand;
    type Event = TreatmentPlanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TreatmentPlanEvent::PlanProposed(e) => {
                self.id = e.plan_id;
                self.organization_id = Some(e.organization_id);
                self.clinic_id = e.clinic_id;
                self.patient_id = Some(e.patient_id);
                self.plan_number = e.plan_number.clone();
                self.status = TreatmentPlanStatus::Proposed;
                self.created = true;
            }
            TreatmentPlanEvent::ProcedureAdded(e) => {
                self.procedures.push(e.procedure.clone());
            }
            TreatmentPlanEvent::PlanAccepted(_) => {
                self.status = TreatmentPlanStatus::Accepted;
            }
            TreatmentPlanEvent::PlanInvoiced(_) => {
                self.status = TreatmentPlanStatus::Invoiced;
            }
            TreatmentPlanEvent::PlanCompleted(_) => {
                self.status = TreatmentPlanStatus::Completed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TreatmentPlanCommand::ProposePlan(cmd) => self.handle_propose(cmd),
            TreatmentPlanCommand::AddProcedure(cmd) => self.handle_add_procedure(cmd),
            TreatmentPlanCommand::AcceptPlan(cmd) => self.handle_accept(cmd),
            TreatmentPlanCommand::MarkInvoiced(cmd) => self.handle_mark_invoiced(cmd),
            TreatmentPlanCommand::CompletePlan(cmd) => self.handle_complete(cmd),
        }
    }
}

impl TreatmentPlan {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_plan_id(&self, plan_id: TreatmentPlanId) -> Result<(), DomainError> {
        if self.id != plan_id {
            return Err(DomainError::invariant("plan_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, cmd_org: OrganizationId, plan_id: TreatmentPlanId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("treatment plan"));
        }
        self.ensure_organization(cmd_org)?;
        self.ensure_plan_id(plan_id)
    }

    fn handle_propose(&self, cmd: &ProposePlan) -> Result<Vec<TreatmentPlanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("treatment plan already exists"));
        }
        if cmd.plan_number.trim().is_empty() {
            return Err(DomainError::validation("plan_number cannot be empty"));
        }

        Ok(vec![TreatmentPlanEvent::PlanProposed(PlanProposed {
            organization_id: cmd.organization_id,
            clinic_id: cmd.clinic_id,
            plan_id: cmd.plan_id,
            patient_id: cmd.patient_id,
            plan_number: cmd.plan_number.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_procedure(&self, cmd: &AddProcedure) -> Result<Vec<TreatmentPlanEvent>, DomainError> {
        self.ensure_exists(cmd.organization_id, cmd.plan_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "procedures can only be added while the plan is proposed",
            ));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("procedure code cannot be empty"));
        }
        if cmd.cost == 0 {
            return Err(DomainError::validation("procedure cost must be positive"));
        }

        let procedure = PlannedProcedure {
            line_no: (self.procedures.len() as u32) + 1,
            code: cmd.code.clone(),
            description: cmd.description.clone(),
            tooth: cmd.tooth.clone(),
            cost: cmd.cost,
        };

        Ok(vec![TreatmentPlanEvent::ProcedureAdded(ProcedureAdded {
            organization_id: cmd.organization_id,
            plan_id: cmd.plan_id,
            procedure,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept(&self, cmd: &AcceptPlan) -> Result<Vec<TreatmentPlanEvent>, DomainError> {
        self.ensure_exists(cmd.organization_id, cmd.plan_id)?;

        if self.status != TreatmentPlanStatus::Proposed {
            return Err(DomainError::conflict("only a proposed plan can be accepted"));
        }
        if self.procedures.is_empty() {
            return Err(DomainError::validation(
                "cannot accept a plan without procedures",
            ));
        }

        Ok(vec![TreatmentPlanEvent::PlanAccepted(PlanAccepted {
            organization_id: cmd.organization_id,
            plan_id: cmd.plan_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_invoiced(&self, cmd: &MarkInvoiced) -> Result<Vec<TreatmentPlanEvent>, DomainError> {
        self.ensure_exists(cmd.organization_id, cmd.plan_id)?;

        if !self.is_invoice_allowed() {
            return Err(DomainError::invariant(
                "only an accepted plan can be invoiced",
            ));
        }

        Ok(vec![TreatmentPlanEvent::PlanInvoiced(PlanInvoiced {
            organization_id: cmd.organization_id,
            plan_id: cmd.plan_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompletePlan) -> Result<Vec<TreatmentPlanEvent>, DomainError> {
        self.ensure_exists(cmd.organization_id, cmd.plan_id)?;

        if self.status != TreatmentPlanStatus::Invoiced {
            return Err(DomainError::invariant(
                "only an invoiced plan can be completed",
            ));
        }

        Ok(vec![TreatmentPlanEvent::PlanCompleted(PlanCompleted {
            organization_id: cmd.organization_id,
            plan_id: cmd.plan_id,
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

    fn test_plan_id() -> TreatmentPlanId {
        TreatmentPlanId::new(AggregateId::new())
    }

    fn test_patient_id() -> PatientId {
        PatientId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn proposed_plan(organization_id: OrganizationId, plan_id: TreatmentPlanId) -> TreatmentPlan {
        let mut plan = TreatmentPlan::empty(plan_id);
        let events = plan
            .handle(&TreatmentPlanCommand::ProposePlan(ProposePlan {
                organization_id,
                clinic_id: None,
                plan_id,
                patient_id: test_patient_id(),
                plan_number: "TP-202501-0001".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            plan.apply(e);
        }
        plan
    }

    fn add_procedure(plan: &mut TreatmentPlan, organization_id: OrganizationId, cost: u64) {
        let events = plan
            .handle(&TreatmentPlanCommand::AddProcedure(AddProcedure {
                organization_id,
                plan_id: plan.id_typed(),
                code: "D2740".to_string(),
                description: "Crown, porcelain/ceramic".to_string(),
                tooth: Some("14".to_string()),
                cost,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            plan.apply(e);
        }
    }

    #[test]
    fn propose_then_add_procedures_accumulates_cost() {
        let organization_id = test_org_id();
        let mut plan = proposed_plan(organization_id, test_plan_id());
        assert_eq!(plan.plan_number(), "TP-202501-0001");

        add_procedure(&mut plan, organization_id, 45_000);
        add_procedure(&mut plan, organization_id, 12_500);

        assert_eq!(plan.procedures().len(), 2);
        assert_eq!(plan.procedures()[0].line_no, 1);
        assert_eq!(plan.procedures()[1].line_no, 2);
        assert_eq!(plan.total_cost(), 57_500);
    }

    #[test]
    fn accepting_an_empty_plan_is_rejected() {
        let organization_id = test_org_id();
        let plan = proposed_plan(organization_id, test_plan_id());

        let err = plan
            .handle(&TreatmentPlanCommand::AcceptPlan(AcceptPlan {
                organization_id,
                plan_id: plan.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn accepted_plan_cannot_be_modified_but_can_be_invoiced() {
        let organization_id = test_org_id();
        let mut plan = proposed_plan(organization_id, test_plan_id());
        add_procedure(&mut plan, organization_id, 45_000);

        let events = plan
            .handle(&TreatmentPlanCommand::AcceptPlan(AcceptPlan {
                organization_id,
                plan_id: plan.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        plan.apply(&events[0]);
        assert_eq!(plan.status(), TreatmentPlanStatus::Accepted);
        assert!(plan.is_invoice_allowed());

        let err = plan
            .handle(&TreatmentPlanCommand::AddProcedure(AddProcedure {
                organization_id,
                plan_id: plan.id_typed(),
                code: "D1110".to_string(),
                description: "Prophylaxis".to_string(),
                tooth: None,
                cost: 9_000,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let events = plan
            .handle(&TreatmentPlanCommand::MarkInvoiced(MarkInvoiced {
                organization_id,
                plan_id: plan.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        plan.apply(&events[0]);
        assert_eq!(plan.status(), TreatmentPlanStatus::Invoiced);
    }

    #[test]
    fn invoicing_requires_acceptance() {
        let organization_id = test_org_id();
        let mut plan = proposed_plan(organization_id, test_plan_id());
        add_procedure(&mut plan, organization_id, 45_000);

        let err = plan
            .handle(&TreatmentPlanCommand::MarkInvoiced(MarkInvoiced {
                organization_id,
                plan_id: plan.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
