//! Treatment planning module (event-sourced).
//!
//! A treatment plan is proposed with costed procedures, accepted by the
//! patient, and later invoiced. Billing raises invoices against accepted
//! plans.

pub mod plan;

pub use plan::{
    AcceptPlan, AddProcedure, CompletePlan, MarkInvoiced, PlanAccepted, PlanCompleted,
    PlanInvoiced, PlanProposed, PlannedProcedure, ProcedureAdded, ProposePlan, TreatmentPlan,
    TreatmentPlanCommand, TreatmentPlanEvent, TreatmentPlanId, TreatmentPlanStatus,
};
