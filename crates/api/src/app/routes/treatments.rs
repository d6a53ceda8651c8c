use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use clinicore_auth::Permission;
use clinicore_core::{AggregateId, DocumentKind};
use clinicore_patients::PatientId;
use clinicore_treatments::{
    AcceptPlan, AddProcedure, CompletePlan, MarkInvoiced, ProposePlan, TreatmentPlan,
    TreatmentPlanCommand, TreatmentPlanId,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(propose_plan).get(list_plans))
        .route("/:id", get(get_plan))
        .route("/:id/procedures", post(add_procedure))
        .route("/:id/accept", post(accept_plan))
        .route("/:id/mark-invoiced", post(mark_invoiced))
        .route("/:id/complete", post(complete_plan))
}

fn dispatch_plan(
    services: &AppServices,
    organization: &crate::context::OrganizationContext,
    agg: AggregateId,
    cmd: TreatmentPlanCommand,
) -> Result<usize, axum::response::Response> {
    services
        .dispatch::<TreatmentPlan>(
            organization.organization_id(),
            agg,
            "treatments.plan",
            cmd,
            |_org, aggregate_id| TreatmentPlan::empty(TreatmentPlanId::new(aggregate_id)),
        )
        .map(|committed| committed.len())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn propose_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::ProposePlanRequest>,
) -> axum::response::Response {
    let patient_agg: AggregateId = match body.patient_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };

    let now = Utc::now();
    let plan_number = match services.allocate_number(
        organization.organization_id(),
        DocumentKind::TreatmentPlan,
        now,
    ) {
        Ok(n) => n,
        Err(e) => return errors::sequence_error_to_response(e),
    };

    let agg = AggregateId::new();
    let cmd = TreatmentPlanCommand::ProposePlan(ProposePlan {
        organization_id: organization.organization_id(),
        clinic_id: organization.clinic_id(),
        plan_id: TreatmentPlanId::new(agg),
        patient_id: PatientId::new(patient_agg),
        plan_number: plan_number.clone(),
        occurred_at: now,
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("treatments.plans.propose")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_plan(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "plan_number": plan_number,
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn add_procedure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddProcedureRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan id"),
    };

    let cmd = TreatmentPlanCommand::AddProcedure(AddProcedure {
        organization_id: organization.organization_id(),
        plan_id: TreatmentPlanId::new(agg),
        code: body.code,
        description: body.description,
        tooth: body.tooth,
        cost: body.cost,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("treatments.plans.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_plan(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn accept_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan id"),
    };

    let cmd = TreatmentPlanCommand::AcceptPlan(AcceptPlan {
        organization_id: organization.organization_id(),
        plan_id: TreatmentPlanId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("treatments.plans.accept")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_plan(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn mark_invoiced(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan id"),
    };

    let cmd = TreatmentPlanCommand::MarkInvoiced(MarkInvoiced {
        organization_id: organization.organization_id(),
        plan_id: TreatmentPlanId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("treatments.plans.invoice")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_plan(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn complete_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan id"),
    };

    let cmd = TreatmentPlanCommand::CompletePlan(CompletePlan {
        organization_id: organization.organization_id(),
        plan_id: TreatmentPlanId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("treatments.plans.complete")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_plan(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan id"),
    };
    let plan_id = TreatmentPlanId::new(agg);
    match services.plans_get(organization.organization_id(), &plan_id) {
        Some(rm) => (StatusCode::OK, Json(dto::plan_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "treatment plan not found"),
    }
}

pub async fn list_plans(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> axum::response::Response {
    let items = services
        .plans_list(organization.organization_id())
        .into_iter()
        .map(dto::plan_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
