//! Service wiring: picks the storage backends and builds the engine on top.

use std::sync::Arc;

use tracing::info;

use warehousing_infra::config::AppConfig;
use warehousing_infra::db;
use warehousing_infra::ledger::{InMemoryLedgerBackend, LedgerBackend, PostgresLedgerBackend};
use warehousing_infra::master_data::{
    InMemoryMasterData, MasterDataDirectory, PostgresMasterData,
};
use warehousing_infra::{EngineConfig, InventoryLedger, ReservationEngine};
use warehousing_inventory::{NewProduct, NewWarehouse, ProductCode};

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppServices {
    pub engine: ReservationEngine,
    pub ledger: InventoryLedger,
    pub directory: Arc<dyn MasterDataDirectory>,
}

impl AppServices {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        directory: Arc<dyn MasterDataDirectory>,
        config: EngineConfig,
    ) -> Self {
        let ledger = InventoryLedger::new(backend);
        let engine = ReservationEngine::new(ledger.clone(), directory.clone(), config);
        Self {
            engine,
            ledger,
            directory,
        }
    }

    /// Process-local storage; state is lost on exit.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryLedgerBackend::new()),
            Arc::new(InMemoryMasterData::new()),
            config,
        )
    }

    /// Postgres when `DATABASE_URL` is set, in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let Some(database) = &config.database else {
            info!("DATABASE_URL not set; using in-memory storage");
            return Ok(Self::in_memory(config.engine));
        };

        let pool = db::connect(database).await?;
        db::bootstrap_schema(&pool).await?;

        Ok(Self::new(
            Arc::new(PostgresLedgerBackend::new(pool.clone())),
            Arc::new(PostgresMasterData::new(pool)),
            config.engine,
        ))
    }

    /// Register a small demo catalogue with stock, unless warehouses already exist.
    pub async fn seed_demo(&self) -> anyhow::Result<()> {
        if !self.directory.list_warehouses().await?.is_empty() {
            info!("master data present; skipping demo seed");
            return Ok(());
        }

        let north = self
            .directory
            .register_warehouse(NewWarehouse::new("North"))
            .await?;
        let south = self
            .directory
            .register_warehouse(NewWarehouse::new("South"))
            .await?;
        self.directory
            .register_warehouse(NewWarehouse {
                name: "Overflow".into(),
                available: false,
            })
            .await?;

        let catalogue = [
            ("Classic T-shirt", "M", "TSHIRT-M", 120, 40),
            ("Classic T-shirt", "L", "TSHIRT-L", 80, 25),
            ("Rain jacket", "L", "JACKET-L", 30, 10),
            ("Running shoes", "42", "SHOES-42", 45, 0),
        ];
        for (name, size, code, north_qty, south_qty) in catalogue {
            let product = self
                .directory
                .register_product(NewProduct {
                    name: name.into(),
                    size: size.into(),
                    code: ProductCode::parse(code)?,
                })
                .await?;
            self.ledger.restock(north.id, &product, north_qty).await?;
            if south_qty > 0 {
                self.ledger.restock(south.id, &product, south_qty).await?;
            }
        }

        info!("demo data seeded");
        Ok(())
    }

    /// Log every warehouse, product and stock record.
    pub async fn log_inventory_report(&self) -> anyhow::Result<()> {
        let warehouses = self.directory.list_warehouses().await?;
        for w in &warehouses {
            info!(warehouse_id = %w.id, name = %w.name, available = w.available, "warehouse");
        }
        for p in self.directory.list_products().await? {
            info!(product_id = %p.id, code = %p.code, name = %p.name, size = %p.size, "product");
        }
        for w in &warehouses {
            for r in self.ledger.list_warehouse(w.id).await? {
                info!(
                    warehouse_id = %r.warehouse_id(),
                    code = %r.product_code(),
                    quantity = r.quantity(),
                    reserved_quantity = r.reserved_quantity(),
                    "stock record"
                );
            }
        }
        Ok(())
    }
}
