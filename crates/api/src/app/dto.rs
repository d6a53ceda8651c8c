use serde::Deserialize;

use clinicore_billing::PaymentMethod;
use clinicore_infra::projections::{
    AppointmentReadModel, InvoiceReadModel, PatientReadModel, PrescriptionReadModel,
    SupplyReadModel, TreatmentPlanReadModel,
};
use clinicore_patients::ContactInfo;
use clinicore_prescriptions::PrescriptionItem;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterPatientRequest {
    pub name: String,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProposePlanRequest {
    pub patient_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddProcedureRequest {
    pub code: String,
    pub description: String,
    pub tooth: Option<String>,
    pub cost: u64,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleAppointmentRequest {
    pub patient_id: String,
    pub dentist_id: String,
    pub starts_at: String, // RFC3339
    pub ends_at: String,   // RFC3339
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub starts_at: String, // RFC3339
    pub ends_at: String,   // RFC3339
}

#[derive(Debug, Deserialize)]
pub struct InvoiceLineRequest {
    pub description: String,
    pub procedure_code: Option<String>,
    pub quantity: i64,
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub patient_id: String,
    pub treatment_plan_id: Option<String>,
    pub due_date: String, // RFC3339
    pub lines: Vec<InvoiceLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AddPaymentRequest {
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub amount: u64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssuePrescriptionRequest {
    pub patient_id: String,
    pub items: Vec<PrescriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSupplyItemRequest {
    pub name: String,
    pub unit: String,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetReorderLevelRequest {
    pub level: i64,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn patient_to_json(rm: PatientReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.patient_id.0.to_string(),
        "clinic_id": rm.clinic_id.map(|c| c.to_string()),
        "name": rm.name,
        "date_of_birth": rm.date_of_birth,
        "contact": {
            "email": rm.contact.email,
            "phone": rm.contact.phone,
            "address": rm.contact.address,
        },
        "status": format!("{:?}", rm.status).to_lowercase(),
    })
}

pub fn plan_to_json(rm: TreatmentPlanReadModel) -> serde_json::Value {
    let total_cost = rm.total_cost();
    serde_json::json!({
        "id": rm.plan_id.0.to_string(),
        "clinic_id": rm.clinic_id.map(|c| c.to_string()),
        "patient_id": rm.patient_id.map(|p| p.0.to_string()),
        "plan_number": rm.plan_number,
        "status": format!("{:?}", rm.status).to_lowercase(),
        "total_cost": total_cost,
        "procedures": rm.procedures.into_iter().map(|p| serde_json::json!({
            "line_no": p.line_no,
            "code": p.code,
            "description": p.description,
            "tooth": p.tooth,
            "cost": p.cost,
        })).collect::<Vec<_>>(),
    })
}

pub fn appointment_to_json(rm: AppointmentReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.appointment_id.0.to_string(),
        "clinic_id": rm.clinic_id.map(|c| c.to_string()),
        "patient_id": rm.patient_id.map(|p| p.0.to_string()),
        "dentist_id": rm.dentist_id.map(|d| d.to_string()),
        "starts_at": rm.starts_at.map(|t| t.to_rfc3339()),
        "ends_at": rm.ends_at.map(|t| t.to_rfc3339()),
        "reason": rm.reason,
        "status": format!("{:?}", rm.status).to_lowercase(),
    })
}

pub fn invoice_to_json(rm: InvoiceReadModel) -> serde_json::Value {
    let balance_amount = rm.balance_amount();
    serde_json::json!({
        "id": rm.invoice_id.0.to_string(),
        "invoice_number": rm.invoice_number,
        "clinic_id": rm.clinic_id.map(|c| c.to_string()),
        "patient_id": rm.patient_id.map(|p| p.0.to_string()),
        "treatment_plan_id": rm.treatment_plan_id.map(|t| t.0.to_string()),
        "status": rm.status.as_str(),
        "due_date": rm.due_date.map(|d| d.to_rfc3339()),
        "total_amount": rm.total_amount,
        "amount_paid": rm.amount_paid,
        "balance_amount": balance_amount,
        "payments": rm.payments.into_iter().map(|p| serde_json::json!({
            "payment_id": p.payment_id.to_string(),
            "receipt_number": p.receipt_number,
            "amount": p.amount,
            "paid_at": p.paid_at.to_rfc3339(),
            "method": p.method.as_str(),
            "transaction_id": p.transaction_id,
            "notes": p.notes,
            "received_by": p.received_by.to_string(),
        })).collect::<Vec<_>>(),
        "lines": rm.lines.into_iter().map(|l| serde_json::json!({
            "line_no": l.line_no,
            "description": l.description,
            "procedure_code": l.procedure_code,
            "quantity": l.quantity,
            "unit_price": l.unit_price,
        })).collect::<Vec<_>>(),
    })
}

pub fn prescription_to_json(rm: PrescriptionReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.prescription_id.0.to_string(),
        "rx_number": rm.rx_number,
        "patient_id": rm.patient_id.map(|p| p.0.to_string()),
        "prescribed_by": rm.prescribed_by.map(|s| s.to_string()),
        "status": format!("{:?}", rm.status).to_lowercase(),
        "items": rm.items.into_iter().map(|i| serde_json::json!({
            "drug": i.drug,
            "dosage": i.dosage,
            "frequency": i.frequency,
            "duration_days": i.duration_days,
            "instructions": i.instructions,
        })).collect::<Vec<_>>(),
    })
}

pub fn supply_to_json(rm: SupplyReadModel) -> serde_json::Value {
    let needs_reorder = rm.needs_reorder();
    serde_json::json!({
        "id": rm.item_id.0.to_string(),
        "name": rm.name,
        "unit": rm.unit,
        "stock": rm.stock,
        "reorder_level": rm.reorder_level,
        "needs_reorder": needs_reorder,
    })
}
