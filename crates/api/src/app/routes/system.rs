use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::IntoResponse};

use crate::app::services::{self, AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "organization_id": organization.organization_id().to_string(),
        "clinic_id": organization.clinic_id().map(|c| c.to_string()),
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> impl IntoResponse {
    services::organization_sse_stream(services.clone(), organization.organization_id())
}
