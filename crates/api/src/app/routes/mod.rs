use axum::{routing::post, Router};

pub mod catalog;
pub mod reservations;
pub mod system;
pub mod warehouses;

/// Router for the `/api/v1` surface.
pub fn router() -> Router {
    Router::new()
        .route("/reserve", post(reservations::reserve))
        .route("/release", post(reservations::release))
        .route("/products", post(warehouses::list_products))
        .route("/block", post(warehouses::block))
        .route("/unblock", post(warehouses::unblock))
        .route("/stock", post(warehouses::restock))
        .route("/warehouses", post(catalog::register_warehouse))
        .route("/catalog/products", post(catalog::register_product))
}
