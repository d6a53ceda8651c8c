use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use clinicore_auth::Permission;
use clinicore_core::AggregateId;
use clinicore_patients::{
    ArchivePatient, Patient, PatientCommand, PatientId, RegisterPatient, UpdateDetails,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_patient).get(list_patients))
        .route("/:id", put(update_patient).get(get_patient))
        .route("/:id/archive", post(archive_patient))
}

pub async fn register_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::RegisterPatientRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let patient_id = PatientId::new(agg);

    let cmd = PatientCommand::RegisterPatient(RegisterPatient {
        organization_id: organization.organization_id(),
        clinic_id: organization.clinic_id(),
        patient_id,
        name: body.name,
        date_of_birth: body.date_of_birth,
        contact: body.contact,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("patients.register")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Patient>(
        organization.organization_id(),
        agg,
        "patients.patient",
        cmd_auth.inner,
        |_org, aggregate_id| Patient::empty(PatientId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn update_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdatePatientRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };
    let patient_id = PatientId::new(agg);

    let cmd = PatientCommand::UpdateDetails(UpdateDetails {
        organization_id: organization.organization_id(),
        patient_id,
        name: body.name,
        contact: body.contact,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("patients.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Patient>(
        organization.organization_id(),
        agg,
        "patients.patient",
        cmd_auth.inner,
        |_org, aggregate_id| Patient::empty(PatientId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn archive_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReasonRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };
    let patient_id = PatientId::new(agg);

    let cmd = PatientCommand::ArchivePatient(ArchivePatient {
        organization_id: organization.organization_id(),
        patient_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("patients.archive")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Patient>(
        organization.organization_id(),
        agg,
        "patients.patient",
        cmd_auth.inner,
        |_org, aggregate_id| Patient::empty(PatientId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn get_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };
    let patient_id = PatientId::new(agg);
    match services.patients_get(organization.organization_id(), &patient_id) {
        Some(rm) => (StatusCode::OK, Json(dto::patient_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "patient not found"),
    }
}

pub async fn list_patients(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> axum::response::Response {
    let items = services
        .patients_list(organization.organization_id())
        .into_iter()
        .map(dto::patient_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
