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
use clinicore_inventory::{
    AdjustStock, CreateItem, InventoryCommand, SetReorderLevel, SupplyItem, SupplyItemId,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/items", post(create_item).get(list_items))
        .route("/items/:id", get(get_item))
        .route("/items/:id/adjust", post(adjust_stock))
        .route("/items/:id/reorder-level", put(set_reorder_level))
}

fn dispatch_item(
    services: &AppServices,
    organization: &crate::context::OrganizationContext,
    agg: AggregateId,
    cmd: InventoryCommand,
) -> Result<usize, axum::response::Response> {
    services
        .dispatch::<SupplyItem>(
            organization.organization_id(),
            agg,
            "inventory.item",
            cmd,
            |_org, aggregate_id| SupplyItem::empty(SupplyItemId::new(aggregate_id)),
        )
        .map(|committed| committed.len())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateSupplyItemRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let cmd = InventoryCommand::CreateItem(CreateItem {
        organization_id: organization.organization_id(),
        item_id: SupplyItemId::new(agg),
        name: body.name,
        unit: body.unit,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("inventory.items.create")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_item(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid item id"),
    };

    let cmd = InventoryCommand::AdjustStock(AdjustStock {
        organization_id: organization.organization_id(),
        item_id: SupplyItemId::new(agg),
        delta: body.delta,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("inventory.items.adjust")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_item(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn set_reorder_level(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetReorderLevelRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid item id"),
    };

    let cmd = InventoryCommand::SetReorderLevel(SetReorderLevel {
        organization_id: organization.organization_id(),
        item_id: SupplyItemId::new(agg),
        level: body.level,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("inventory.items.configure")],
    };
    if let Err(e) = crate::authz::authorize_command(&organization, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match dispatch_item(&services, &organization, agg, cmd_auth.inner) {
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

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid item id"),
    };
    let item_id = SupplyItemId::new(agg);
    match services.supplies_get(organization.organization_id(), &item_id) {
        Some(rm) => (StatusCode::OK, Json(dto::supply_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "supply item not found"),
    }
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(organization): Extension<crate::context::OrganizationContext>,
) -> axum::response::Response {
    let items = services
        .supplies_list(organization.organization_id())
        .into_iter()
        .map(dto::supply_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
