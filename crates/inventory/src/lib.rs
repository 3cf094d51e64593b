//! Warehouse inventory domain.
//!
//! Stock records, products, warehouses and the pure reservation planner.
//! Deterministic domain logic only: no IO, no HTTP, no storage.

pub mod batch;
pub mod product;
pub mod stock;
pub mod warehouse;

pub use batch::{
    plan_batch, BatchKind, BatchRejection, BatchRequest, LineItem, PlannedLine, ReservationPlan,
    StockMutation,
};
pub use product::{NewProduct, Product, ProductCode};
pub use stock::{StockError, StockRecord, StockRecordParts};
pub use warehouse::{NewWarehouse, Warehouse};
