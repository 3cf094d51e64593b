//! Postgres-backed master data (`warehouses`, `products`).

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use warehousing_core::{ProductId, WarehouseId};
use warehousing_inventory::{NewProduct, NewWarehouse, Product, ProductCode, Warehouse};

use super::{DirectoryError, MasterDataDirectory};

#[derive(Debug, Clone)]
pub struct PostgresMasterData {
    pool: PgPool,
}

impl PostgresMasterData {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MasterDataDirectory for PostgresMasterData {
    #[instrument(skip(self, new), fields(name = %new.name), err)]
    async fn register_warehouse(&self, new: NewWarehouse) -> Result<Warehouse, DirectoryError> {
        new.validate()?;
        let row = sqlx::query(
            "INSERT INTO warehouses (name, availability) VALUES ($1, $2) RETURNING id, name, availability",
        )
        .bind(new.name.trim())
        .bind(new.available)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_warehouse", e))?;
        warehouse_from_row(&row)
    }

    #[instrument(skip(self, new), fields(code = %new.code), err)]
    async fn register_product(&self, new: NewProduct) -> Result<Product, DirectoryError> {
        new.validate()?;
        let row = sqlx::query(
            "INSERT INTO products (name, size, code) VALUES ($1, $2, $3) RETURNING id, name, size, code",
        )
        .bind(new.name.trim())
        .bind(&new.size)
        .bind(new.code.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_product", e))?;
        product_from_row(&row)
    }

    async fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, DirectoryError> {
        let row = sqlx::query("SELECT id, name, availability FROM warehouses WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("warehouse", e))?;
        row.as_ref().map(warehouse_from_row).transpose()
    }

    async fn product_by_code(&self, code: &ProductCode) -> Result<Option<Product>, DirectoryError> {
        let row = sqlx::query("SELECT id, name, size, code FROM products WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_by_code", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn set_availability(
        &self,
        id: WarehouseId,
        available: bool,
    ) -> Result<Warehouse, DirectoryError> {
        let row = sqlx::query(
            "UPDATE warehouses SET availability = $2 WHERE id = $1 RETURNING id, name, availability",
        )
        .bind(id.get())
        .bind(available)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_availability", e))?;
        match row {
            Some(row) => warehouse_from_row(&row),
            None => Err(DirectoryError::NotFound(format!("warehouse {id}"))),
        }
    }

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, DirectoryError> {
        let rows = sqlx::query("SELECT id, name, availability FROM warehouses ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_warehouses", e))?;
        rows.iter().map(warehouse_from_row).collect()
    }

    async fn list_products(&self) -> Result<Vec<Product>, DirectoryError> {
        let rows = sqlx::query("SELECT id, name, size, code FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(product_from_row).collect()
    }
}

fn warehouse_from_row(row: &sqlx::postgres::PgRow) -> Result<Warehouse, DirectoryError> {
    let decode = |e: sqlx::Error| DirectoryError::Unavailable(format!("failed to decode warehouse row: {e}"));
    Ok(Warehouse {
        id: WarehouseId::new(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        available: row.try_get("availability").map_err(decode)?,
    })
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> Result<Product, DirectoryError> {
    let decode = |e: sqlx::Error| DirectoryError::Unavailable(format!("failed to decode product row: {e}"));
    let code: String = row.try_get("code").map_err(decode)?;
    Ok(Product {
        id: ProductId::new(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        size: row.try_get("size").map_err(decode)?,
        code: ProductCode::parse(code)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DirectoryError::Duplicate(msg),
                _ => DirectoryError::Unavailable(msg),
            }
        }
        other => DirectoryError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}
