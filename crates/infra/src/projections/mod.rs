//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Organization-isolated**: Data is partitioned by organization
//! - **Idempotent**: Safe for at-least-once delivery

pub mod appointments;
pub mod invoices;
pub mod patients;
pub mod prescriptions;
pub mod supply_stock;
pub mod treatment_plans;

pub use appointments::{AppointmentBookProjection, AppointmentReadModel};
pub use invoices::{InvoiceReadModel, InvoicesProjection};
pub use patients::{PatientDirectoryProjection, PatientReadModel};
pub use prescriptions::{PrescriptionReadModel, PrescriptionRegisterProjection};
pub use supply_stock::{SupplyReadModel, SupplyStockProjection};
pub use treatment_plans::{TreatmentPlanReadModel, TreatmentPlansProjection};
