use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use warehousing_core::{ProductId, WarehouseId};
use warehousing_inventory::{NewProduct, NewWarehouse, Product, ProductCode, Warehouse};

use super::{DirectoryError, MasterDataDirectory};

#[derive(Debug, Default)]
struct Catalog {
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    products: BTreeMap<ProductId, Product>,
    next_warehouse: i64,
    next_product: i64,
}

/// In-memory master data. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMasterData {
    catalog: RwLock<Catalog>,
}

impl InMemoryMasterData {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DirectoryError {
    DirectoryError::Unavailable("master data lock poisoned".to_string())
}

#[async_trait]
impl MasterDataDirectory for InMemoryMasterData {
    async fn register_warehouse(&self, new: NewWarehouse) -> Result<Warehouse, DirectoryError> {
        new.validate()?;
        let mut catalog = self.catalog.write().map_err(|_| poisoned())?;
        catalog.next_warehouse += 1;
        let warehouse = Warehouse {
            id: WarehouseId::new(catalog.next_warehouse),
            name: new.name.trim().to_string(),
            available: new.available,
        };
        catalog.warehouses.insert(warehouse.id, warehouse.clone());
        Ok(warehouse)
    }

    async fn register_product(&self, new: NewProduct) -> Result<Product, DirectoryError> {
        new.validate()?;
        let mut catalog = self.catalog.write().map_err(|_| poisoned())?;
        if catalog.products.values().any(|p| p.code == new.code) {
            return Err(DirectoryError::Duplicate(format!("product code '{}'", new.code)));
        }
        catalog.next_product += 1;
        let product = Product {
            id: ProductId::new(catalog.next_product),
            name: new.name.trim().to_string(),
            size: new.size,
            code: new.code,
        };
        catalog.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, DirectoryError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog.warehouses.get(&id).cloned())
    }

    async fn product_by_code(&self, code: &ProductCode) -> Result<Option<Product>, DirectoryError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog.products.values().find(|p| &p.code == code).cloned())
    }

    async fn set_availability(
        &self,
        id: WarehouseId,
        available: bool,
    ) -> Result<Warehouse, DirectoryError> {
        let mut catalog = self.catalog.write().map_err(|_| poisoned())?;
        let warehouse = catalog
            .warehouses
            .get_mut(&id)
            .ok_or_else(|| DirectoryError::NotFound(format!("warehouse {id}")))?;
        warehouse.available = available;
        Ok(warehouse.clone())
    }

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, DirectoryError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog.warehouses.values().cloned().collect())
    }

    async fn list_products(&self) -> Result<Vec<Product>, DirectoryError> {
        let catalog = self.catalog.read().map_err(|_| poisoned())?;
        Ok(catalog.products.values().cloned().collect())
    }
}
