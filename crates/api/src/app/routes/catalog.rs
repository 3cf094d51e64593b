use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use warehousing_inventory::{NewProduct, NewWarehouse};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub async fn register_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterWarehouseRequest>,
) -> axum::response::Response {
    let new = NewWarehouse {
        name: body.name,
        available: body.available,
    };
    match services.directory.register_warehouse(new).await {
        Ok(w) => (StatusCode::CREATED, Json(dto::WarehouseDto::from(w))).into_response(),
        Err(e) => errors::directory_error_to_response(e),
    }
}

pub async fn register_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterProductRequest>,
) -> axum::response::Response {
    let code = match dto::parse_code(&body.code) {
        Ok(code) => code,
        Err(resp) => return resp,
    };
    let new = NewProduct {
        name: body.name,
        size: body.size,
        code,
    };
    match services.directory.register_product(new).await {
        Ok(p) => (StatusCode::CREATED, Json(dto::ProductDto::from(p))).into_response(),
        Err(e) => errors::directory_error_to_response(e),
    }
}
