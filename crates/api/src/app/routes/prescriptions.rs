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
use clinicore_core::{AggregateId, DocumentKind, StaffId};
use clinicore_patients::PatientId;
use clinicore_prescriptions::{
    CancelPrescription, DispensePrescription, IssuePrescription, Prescription,
    PrescriptionCommand, PrescriptionId,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(issue_prescription).get(list_prescriptions))
        .route("/:id", get(get_prescription))
        .route("/:id/dispense", post(dispense_prescription))
        .route("/:id/cancel", post(cancel_prescription))
}

fn dispatch_prescription(
    services: &AppServices,
    organization: &crate::context::OrganizationContext,
    agg: AggregateId,
    cmd: PrescriptionCommand,
) -> Result<usize, axum::response::Response> {
    services
        .dispatch::<Prescription>(
            organization.organization_id(),
            agg,
            "prescriptions.prescription",
            cmd,
            |_org, aggregate_id| Prescription::empty(PrescriptionId::new(aggregate_id)),
        )
        .map(|committed| committed.len())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn issue_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::IssuePrescriptionRequest>,
) -> axum::response::Response {
    let patient_agg: AggregateId = match body.patient_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };

    let now = Utc::now();
    let rx_number = match services.allocate_number(
        organization.organization_id(),
        DocumentKind::Prescription,
        now,
    ) {
        Ok(n) => n,
        Err(e) => return errors::sequence_error_to_response(e),
    };

    let agg = AggregateId::new();
    let cmd = PrescriptionCommand::IssuePrescription(IssuePrescription {
        organization_id: organization.organization_id(),
        clinic_id: organization.clinic_id(),
        prescription_id: PrescriptionId::new(agg),
        patient_id: PatientId::new(patient_agg),
        prescribed_by: StaffId::from_uuid(*principal.principal_id().as_uuid()),
        rx_number: rx_number.clone(),
        items: body.items,
        occurred_at: now,
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("prescriptions.issue")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_prescription(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "rx_number": rx_number,
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn dispense_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid prescription id"),
    };

    let cmd = PrescriptionCommand::DispensePrescription(DispensePrescription {
        organization_id: organization.organization_id(),
        prescription_id: PrescriptionId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("prescriptions.dispense")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_prescription(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn cancel_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReasonRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid prescription id"),
    };

    let cmd = PrescriptionCommand::CancelPrescription(CancelPrescription {
        organization_id: organization.organization_id(),
        prescription_id: PrescriptionId::new(agg),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("prescriptions.cancel")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_prescription(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn get_prescription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid prescription id"),
    };
    let prescription_id = PrescriptionId::new(agg);
    match services.prescriptions_get(organization.organization_id(), &prescription_id) {
        Some(rm) => (StatusCode::OK, Json(dto::prescription_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "prescription not found"),
    }
}

pub async fn list_prescriptions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> axum::response::Response {
    let items = services
        .prescriptions_list(organization.organization_id())
        .into_iter()
        .map(dto::prescription_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
