use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};

use clinicore_auth::Permission;
use clinicore_core::{AggregateId, StaffId};
use clinicore_patients::PatientId;
use clinicore_scheduling::{
    Appointment, AppointmentCommand, AppointmentId, CancelAppointment, CompleteAppointment,
    RescheduleAppointment, ScheduleAppointment,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(schedule_appointment).get(list_appointments))
        .route("/:id", get(get_appointment))
        .route("/:id/reschedule", put(reschedule_appointment))
        .route("/:id/complete", post(complete_appointment))
        .route("/:id/cancel", post(cancel_appointment))
}

fn parse_rfc3339(raw: &str, field: &'static str) -> Result<DateTime<Utc>, axum::response::Response> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_timestamp",
                format!("{field} must be RFC3339"),
            )
        })
}

fn dispatch_appointment(
    services: &AppServices,
    organization: &crate::context::OrganizationContext,
    agg: AggregateId,
    cmd: AppointmentCommand,
) -> Result<usize, axum::response::Response> {
    services
        .dispatch::<Appointment>(
            organization.organization_id(),
            agg,
            "scheduling.appointment",
            cmd,
            |_org, aggregate_id| Appointment::empty(AppointmentId::new(aggregate_id)),
        )
        .map(|committed| committed.len())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn schedule_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::ScheduleAppointmentRequest>,
) -> axum::response::Response {
    let patient_agg: AggregateId = match body.patient_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };
    let dentist_id: StaffId = match body.dentist_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid dentist id"),
    };
    let starts_at = match parse_rfc3339(&body.starts_at, "starts_at") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ends_at = match parse_rfc3339(&body.ends_at, "ends_at") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let agg = AggregateId::new();
    let cmd = AppointmentCommand::ScheduleAppointment(ScheduleAppointment {
        organization_id: organization.organization_id(),
        clinic_id: organization.clinic_id(),
        appointment_id: AppointmentId::new(agg),
        patient_id: PatientId::new(patient_agg),
        dentist_id,
        starts_at,
        ends_at,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("appointments.schedule")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_appointment(&services, &organization, agg, cmd_auth.inner) {
        Ok(events_committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": events_committed,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn reschedule_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RescheduleAppointmentRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid appointment id"),
    };
    let starts_at = match parse_rfc3339(&body.starts_at, "starts_at") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ends_at = match parse_rfc3339(&body.ends_at, "ends_at") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = AppointmentCommand::RescheduleAppointment(RescheduleAppointment {
        organization_id: organization.organization_id(),
        appointment_id: AppointmentId::new(agg),
        starts_at,
        ends_at,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("appointments.reschedule")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_appointment(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn complete_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid appointment id"),
    };

    let cmd = AppointmentCommand::CompleteAppointment(CompleteAppointment {
        organization_id: organization.organization_id(),
        appointment_id: AppointmentId::new(agg),
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("appointments.complete")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_appointment(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn cancel_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReasonRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid appointment id"),
    };

    let cmd = AppointmentCommand::CancelAppointment(CancelAppointment {
        organization_id: organization.organization_id(),
        appointment_id: AppointmentId::new(agg),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("appointments.cancel")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_appointment(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn get_appointment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid appointment id"),
    };
    let appointment_id = AppointmentId::new(agg);
    match services.appointments_get(organization.organization_id(), &appointment_id) {
        Some(rm) => (StatusCode::OK, Json(dto::appointment_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "appointment not found"),
    }
}

pub async fn list_appointments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> axum::response::Response {
    let items = services
        .appointments_list(organization.organization_id())
        .into_iter()
        .map(dto::appointment_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
