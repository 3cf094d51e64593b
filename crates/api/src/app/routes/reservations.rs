use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub async fn reserve(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReserveRequest>,
) -> axum::response::Response {
    let lines = match dto::to_line_items(body.reservations) {
        Ok(lines) => lines,
        Err(resp) => return resp,
    };

    match services.engine.reserve(lines).await {
        Ok(receipt) => (StatusCode::OK, Json(dto::BatchResponse::from(receipt))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReleaseRequest>,
) -> axum::response::Response {
    let lines = match dto::to_line_items(body.releases) {
        Ok(lines) => lines,
        Err(resp) => return resp,
    };

    match services.engine.release(lines).await {
        Ok(receipt) => (StatusCode::OK, Json(dto::BatchResponse::from(receipt))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}
