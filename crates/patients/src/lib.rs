//! Patient registry module (event-sourced).
//!
//! Business rules for patient records, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod patient;

pub use patient::{
    ArchivePatient, ContactInfo, DetailsUpdated, Patient, PatientArchived, PatientCommand,
    PatientEvent, PatientId, PatientRegistered, PatientStatus, RegisterPatient, UpdateDetails,
};
