use axum::{Router, routing::get};

pub mod appointments;
pub mod billing;
pub mod common;
pub mod inventory;
pub mod patients;
pub mod prescriptions;
pub mod system;
pub mod treatments;

/// Router for all authenticated (organization-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/patients", patients::router())
        .nest("/treatments", treatments::router())
        .nest("/appointments", appointments::router())
        .nest("/billing", billing::router())
        .nest("/prescriptions", prescriptions::router())
        .nest("/inventory", inventory::router())
}
