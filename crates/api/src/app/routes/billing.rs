use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;
use uuid::Uuid;

use clinicore_auth::Permission;
use clinicore_billing::{
    AddPayment, CancelInvoice, CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceLine,
    RemovePayment, UpdatePayment,
};
use clinicore_core::{AggregateId, DocumentKind, StaffId};
use clinicore_patients::PatientId;
use clinicore_treatments::TreatmentPlanId;

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/payments", post(add_payment))
        .route(
            "/:id/payments/:payment_id",
            put(update_payment).delete(remove_payment),
        )
        .route("/:id/cancel", post(cancel_invoice))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateInvoiceRequest>,
) -> axum::response::Response {
    let patient_agg: AggregateId = match body.patient_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id"),
    };
    let patient_id = PatientId::new(patient_agg);

    let treatment_plan_id = match &body.treatment_plan_id {
        Some(raw) => match raw.parse::<AggregateId>() {
            Ok(v) => Some(TreatmentPlanId::new(v)),
            Err(_) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid treatment plan id");
            }
        },
        None => None,
    };

    let due_date = match chrono::DateTime::parse_from_rfc3339(&body.due_date) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_due_date", "due_date must be RFC3339");
        }
    };

    let now = Utc::now();
    let invoice_number = match services.allocate_number(
        organization.organization_id(),
        DocumentKind::Invoice,
        now,
    ) {
        Ok(n) => n,
        Err(e) => return errors::sequence_error_to_response(e),
    };

    let invoice_agg = AggregateId::new();
    let invoice_id = InvoiceId::new(invoice_agg);

    let lines: Vec<InvoiceLine> = body
        .lines
        .into_iter()
        .enumerate()
        .map(|(idx, l)| InvoiceLine {
            line_no: (idx as u32) + 1,
            description: l.description,
            procedure_code: l.procedure_code,
            quantity: l.quantity,
            unit_price: l.unit_price,
        })
        .collect();

    let cmd = InvoiceCommand::CreateInvoice(CreateInvoice {
        organization_id: organization.organization_id(),
        clinic_id: organization.clinic_id(),
        invoice_id,
        patient_id,
        treatment_plan_id,
        invoice_number: invoice_number.clone(),
        lines,
        due_date,
        occurred_at: now,
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("billing.invoices.create")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Invoice>(
        organization.organization_id(),
        invoice_agg,
        "billing.invoice",
        cmd_auth.inner,
        |_org, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": invoice_agg.to_string(),
            "invoice_number": invoice_number,
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn add_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddPaymentRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"),
    };
    let invoice_id = InvoiceId::new(agg);

    let now = Utc::now();
    let receipt_number = match services.allocate_number(
        organization.organization_id(),
        DocumentKind::PaymentReceipt,
        now,
    ) {
        Ok(n) => Some(n),
        Err(e) => return errors::sequence_error_to_response(e),
    };

    let payment_id = Uuid::now_v7();
    let cmd = InvoiceCommand::AddPayment(AddPayment {
        organization_id: organization.organization_id(),
        invoice_id,
        payment_id,
        receipt_number,
        amount: body.amount,
        method: body.method,
        transaction_id: body.transaction_id,
        notes: body.notes,
        received_by: StaffId::from_uuid(*principal.principal_id().as_uuid()),
        occurred_at: now,
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("billing.payments.record")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Invoice>(
        organization.organization_id(),
        agg,
        "billing.invoice",
        cmd_auth.inner,
        |_org, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "payment_id": payment_id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn update_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, payment_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdatePaymentRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"),
    };
    let invoice_id = InvoiceId::new(agg);

    let payment_id: Uuid = match payment_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid payment id"),
    };

    let cmd = InvoiceCommand::UpdatePayment(UpdatePayment {
        organization_id: organization.organization_id(),
        invoice_id,
        payment_id,
        amount: body.amount,
        method: body.method,
        transaction_id: body.transaction_id,
        notes: body.notes,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("billing.payments.update")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Invoice>(
        organization.organization_id(),
        agg,
        "billing.invoice",
        cmd_auth.inner,
        |_org, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "payment_id": payment_id.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn remove_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, payment_id)): Path<(String, String)>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"),
    };
    let invoice_id = InvoiceId::new(agg);

    let payment_id: Uuid = match payment_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid payment id"),
    };

    let cmd = InvoiceCommand::RemovePayment(RemovePayment {
        organization_id: organization.organization_id(),
        invoice_id,
        payment_id,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("billing.payments.delete")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Invoice>(
        organization.organization_id(),
        agg,
        "billing.invoice",
        cmd_auth.inner,
        |_org, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
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

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReasonRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"),
    };
    let invoice_id = InvoiceId::new(agg);

    let cmd = InvoiceCommand::CancelInvoice(CancelInvoice {
        organization_id: organization.organization_id(),
        invoice_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("billing.invoices.cancel")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.dispatch::<Invoice>(
        organization.organization_id(),
        agg,
        "billing.invoice",
        cmd_auth.inner,
        |_org, aggregate_id| Invoice::empty(InvoiceId::new(aggregate_id)),
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

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"),
    };
    let invoice_id = InvoiceId::new(agg);
    match services.invoices_get(organization.organization_id(), &invoice_id) {
        Some(rm) => (StatusCode::OK, Json(dto::invoice_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> axum::response::Response {
    let items = services
        .invoices_list(organization.organization_id())
        .into_iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
