//! Master data: warehouses and products.
//!
//! The reservation path only needs two things from here: whether a warehouse
//! currently accepts reservations, and the product behind a product code.
//! Registration and listing exist so the service can be populated and
//! inspected; field-level editing is out of scope.

use async_trait::async_trait;
use thiserror::Error;

use warehousing_core::{DomainError, WarehouseId};
use warehousing_inventory::{NewProduct, NewWarehouse, Product, ProductCode, Warehouse};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryMasterData;
pub use postgres::PostgresMasterData;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("master data unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MasterDataDirectory: Send + Sync {
    async fn register_warehouse(&self, new: NewWarehouse) -> Result<Warehouse, DirectoryError>;

    /// Product codes are unique; registering a taken code fails with `Duplicate`.
    async fn register_product(&self, new: NewProduct) -> Result<Product, DirectoryError>;

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, DirectoryError>;

    async fn product_by_code(&self, code: &ProductCode) -> Result<Option<Product>, DirectoryError>;

    /// Block (`false`) or unblock (`true`) new reservations against a warehouse.
    async fn set_availability(
        &self,
        id: WarehouseId,
        available: bool,
    ) -> Result<Warehouse, DirectoryError>;

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, DirectoryError>;

    async fn list_products(&self) -> Result<Vec<Product>, DirectoryError>;
}
