use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use tracing::info;

use warehousing_core::WarehouseId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

/// Stock records held by one warehouse, ordered by product code.
pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::WarehouseRequest>,
) -> axum::response::Response {
    let warehouse_id = WarehouseId::new(body.warehouse_id);

    match services.directory.warehouse(warehouse_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("warehouse {warehouse_id} not found"),
            );
        }
        Err(e) => return errors::directory_error_to_response(e),
    }

    match services.ledger.list_warehouse(warehouse_id).await {
        Ok(records) => Json(dto::WarehouseStockResponse {
            warehouse_id,
            products: records.iter().map(dto::StockRecordDto::from).collect(),
        })
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn block(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::WarehouseRequest>,
) -> axum::response::Response {
    set_availability(&services, WarehouseId::new(body.warehouse_id), false).await
}

pub async fn unblock(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::WarehouseRequest>,
) -> axum::response::Response {
    set_availability(&services, WarehouseId::new(body.warehouse_id), true).await
}

async fn set_availability(
    services: &AppServices,
    warehouse_id: WarehouseId,
    available: bool,
) -> axum::response::Response {
    match services.directory.set_availability(warehouse_id, available).await {
        Ok(warehouse) => {
            info!(%warehouse_id, available, "warehouse availability changed");
            Json(dto::WarehouseDto::from(warehouse)).into_response()
        }
        Err(e) => errors::directory_error_to_response(e),
    }
}

/// Add (or, with a negative quantity, write off) on-hand stock.
pub async fn restock(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::StockRequest>,
) -> axum::response::Response {
    let code = match dto::parse_code(&body.code) {
        Ok(code) => code,
        Err(resp) => return resp,
    };
    let warehouse_id = WarehouseId::new(body.warehouse_id);

    match services.directory.warehouse(warehouse_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("warehouse {warehouse_id} not found"),
            );
        }
        Err(e) => return errors::directory_error_to_response(e),
    }

    let product = match services.directory.product_by_code(&code).await {
        Ok(Some(product)) => product,
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("product '{code}' not found"),
            );
        }
        Err(e) => return errors::directory_error_to_response(e),
    };

    match services.ledger.restock(warehouse_id, &product, body.quantity).await {
        Ok(record) => Json(dto::StockRecordDto::from(&record)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
