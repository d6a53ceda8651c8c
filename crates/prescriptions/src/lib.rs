//! Prescription module (event-sourced).
//!
//! Prescriptions carry organization-wide running `RX` numbers (no monthly
//! reset) and a list of medication items.

pub mod prescription;

pub use prescription::{
    CancelPrescription, DispensePrescription, IssuePrescription, Prescription,
    PrescriptionCancelled, PrescriptionCommand, PrescriptionDispensed, PrescriptionEvent,
    PrescriptionId, PrescriptionIssued, PrescriptionItem, PrescriptionStatus,
};
