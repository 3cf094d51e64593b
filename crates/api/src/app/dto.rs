use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use warehousing_core::{ProductId, WarehouseId};
use warehousing_infra::reservation::{BatchReceipt, ReceiptLine};
use warehousing_inventory::{BatchKind, LineItem, Product, ProductCode, StockRecord, Warehouse};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// One `{code, warehouse_id, quantity}` entry of a reserve or release body.
#[derive(Debug, Clone, Deserialize)]
pub struct LineDto {
    pub code: String,
    pub warehouse_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    #[serde(default)]
    pub reservations: Vec<LineDto>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub releases: Vec<LineDto>,
}

#[derive(Debug, Deserialize)]
pub struct WarehouseRequest {
    pub warehouse_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub code: String,
    pub warehouse_id: i64,
    /// Signed change to the on-hand quantity.
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterWarehouseRequest {
    pub name: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RegisterProductRequest {
    pub name: String,
    pub size: String,
    pub code: String,
}

/// Convert request lines, rejecting the first line with a blank product code.
pub fn to_line_items(lines: Vec<LineDto>) -> Result<Vec<LineItem>, axum::response::Response> {
    lines
        .into_iter()
        .enumerate()
        .map(|(line, dto)| {
            let code = ProductCode::parse(&dto.code).map_err(|e| {
                errors::json_line_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    e.to_string(),
                    line,
                )
            })?;
            Ok(LineItem::new(code, WarehouseId::new(dto.warehouse_id), dto.quantity))
        })
        .collect()
}

pub fn parse_code(raw: &str) -> Result<ProductCode, axum::response::Response> {
    ProductCode::parse(raw).map_err(errors::domain_error_to_response)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub kind: BatchKind,
    pub lines: Vec<ReceiptLine>,
}

impl From<BatchReceipt> for BatchResponse {
    fn from(receipt: BatchReceipt) -> Self {
        Self {
            status: "committed",
            kind: receipt.kind,
            lines: receipt.lines,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StockRecordDto {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub code: ProductCode,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
}

impl From<&StockRecord> for StockRecordDto {
    fn from(r: &StockRecord) -> Self {
        Self {
            warehouse_id: r.warehouse_id(),
            product_id: r.product_id(),
            code: r.product_code().clone(),
            quantity: r.quantity(),
            reserved_quantity: r.reserved_quantity(),
            available_quantity: r.available(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WarehouseStockResponse {
    pub warehouse_id: WarehouseId,
    pub products: Vec<StockRecordDto>,
}

#[derive(Debug, Serialize)]
pub struct WarehouseDto {
    pub id: WarehouseId,
    pub name: String,
    pub available: bool,
}

impl From<Warehouse> for WarehouseDto {
    fn from(w: Warehouse) -> Self {
        Self {
            id: w.id,
            name: w.name,
            available: w.available,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductDto {
    pub id: ProductId,
    pub name: String,
    pub size: String,
    pub code: ProductCode,
}

impl From<Product> for ProductDto {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            name: p.name,
            size: p.size,
            code: p.code,
        }
    }
}
