//! Integration tests for the reservation pipeline.
//!
//! Tests: MasterData → ReservationEngine → LookupIndex → InventoryLedger → backend
//!
//! Verifies:
//! - The reserve / release scenarios and all-or-nothing batches
//! - Concurrent reservations never over-commit a record
//! - Cancelled, failed and conflicting requests leave the ledger untouched

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use warehousing_core::WarehouseId;
use warehousing_inventory::{
    LineItem, NewProduct, NewWarehouse, Product, ProductCode, StockMutation, StockRecord,
};

use crate::ledger::{
    InMemoryLedgerBackend, InventoryLedger, LedgerBackend, LedgerError, LedgerTransaction,
    QuantityChange, StockKey,
};
use crate::master_data::{InMemoryMasterData, MasterDataDirectory};
use crate::reservation::{EngineConfig, RequestState, ReservationEngine, ReservationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    PassThrough,
    StallOnCommit,
    FailOnBegin,
    ConflictOnCommit,
}

/// Backend wrapper that counts transactions and can misbehave on demand.
struct ScriptedBackend {
    inner: InMemoryLedgerBackend,
    mode: Mode,
    begins: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn new(inner: InMemoryLedgerBackend, mode: Mode) -> (Self, Arc<AtomicUsize>) {
        let begins = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                mode,
                begins: begins.clone(),
            },
            begins,
        )
    }
}

#[async_trait]
impl LedgerBackend for ScriptedBackend {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.mode == Mode::FailOnBegin {
            return Err(LedgerError::StorageUnavailable("connection refused".into()));
        }
        Ok(Box::new(ScriptedTransaction {
            inner: self.inner.begin().await?,
            mode: self.mode,
        }))
    }
}

struct ScriptedTransaction {
    inner: Box<dyn LedgerTransaction>,
    mode: Mode,
}

#[async_trait]
impl LedgerTransaction for ScriptedTransaction {
    async fn read_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        self.inner.read_record(key).await
    }

    async fn read_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        self.inner.read_warehouse(warehouse_id).await
    }

    async fn write_records(
        &mut self,
        mutations: &[StockMutation],
    ) -> Result<Vec<StockRecord>, LedgerError> {
        self.inner.write_records(mutations).await
    }

    async fn write_quantity(&mut self, change: &QuantityChange) -> Result<StockRecord, LedgerError> {
        self.inner.write_quantity(change).await
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        match self.mode {
            Mode::StallOnCommit => {
                std::future::pending::<()>().await;
                self.inner.commit().await
            }
            Mode::ConflictOnCommit => {
                self.inner.rollback().await?;
                Err(LedgerError::ConcurrencyConflict("scripted conflict".into()))
            }
            Mode::PassThrough | Mode::FailOnBegin => self.inner.commit().await,
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.inner.rollback().await
    }
}

struct Harness {
    backend: InMemoryLedgerBackend,
    ledger: InventoryLedger,
    directory: Arc<InMemoryMasterData>,
    warehouse: WarehouseId,
}

impl Harness {
    async fn new(stock: &[(&str, i64)]) -> Self {
        let backend = InMemoryLedgerBackend::new();
        let ledger = InventoryLedger::new(Arc::new(backend.clone()));
        let directory = Arc::new(InMemoryMasterData::new());
        let warehouse = directory
            .register_warehouse(NewWarehouse::new("Central"))
            .await
            .unwrap()
            .id;
        let harness = Self {
            backend,
            ledger,
            directory,
            warehouse,
        };
        for (code, quantity) in stock {
            let product = harness.product(code).await;
            harness.ledger.restock(warehouse, &product, *quantity).await.unwrap();
        }
        harness
    }

    async fn product(&self, code: &str) -> Product {
        let code = ProductCode::parse(code).unwrap();
        if let Some(p) = self.directory.product_by_code(&code).await.unwrap() {
            return p;
        }
        self.directory
            .register_product(NewProduct {
                name: format!("Product {code}"),
                size: "L".into(),
                code,
            })
            .await
            .unwrap()
    }

    fn engine(&self) -> ReservationEngine {
        self.engine_over(Arc::new(self.backend.clone()), EngineConfig::default())
    }

    fn engine_over(&self, backend: Arc<dyn LedgerBackend>, config: EngineConfig) -> ReservationEngine {
        ReservationEngine::new(InventoryLedger::new(backend), self.directory.clone(), config)
    }

    fn line(&self, code: &str, quantity: i64) -> LineItem {
        LineItem::new(ProductCode::parse(code).unwrap(), self.warehouse, quantity)
    }

    async fn record(&self, code: &str) -> StockRecord {
        self.ledger
            .get(self.warehouse, &ProductCode::parse(code).unwrap())
            .await
            .unwrap()
    }

    async fn reserved(&self, code: &str) -> i64 {
        self.record(code).await.reserved_quantity()
    }
}

#[tokio::test]
async fn scenario_a_reserve_until_insufficient() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let engine = h.engine();

    let receipt = engine.reserve(vec![h.line("SKU1", 4)]).await.unwrap();
    assert_eq!(receipt.lines[0].reserved_quantity, 4);
    assert_eq!(h.reserved("SKU1").await, 4);

    let err = engine.reserve(vec![h.line("SKU1", 7)]).await.unwrap_err();
    assert_eq!(
        err,
        ReservationError::InsufficientStock {
            line: 0,
            requested: 7,
            reserved: 4,
            quantity: 10
        }
    );
    assert_eq!(err.outcome(), RequestState::Rejected);
    assert_eq!(h.reserved("SKU1").await, 4);
}

#[tokio::test]
async fn scenario_b_release_until_over_release() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let engine = h.engine();
    engine.reserve(vec![h.line("SKU1", 4)]).await.unwrap();

    let receipt = engine.release(vec![h.line("SKU1", 4)]).await.unwrap();
    assert_eq!(receipt.lines[0].reserved_quantity, 0);

    let err = engine.release(vec![h.line("SKU1", 1)]).await.unwrap_err();
    assert_eq!(
        err,
        ReservationError::OverRelease {
            line: 0,
            requested: 1,
            reserved: 0
        }
    );
    assert_eq!(h.reserved("SKU1").await, 0);
}

#[tokio::test]
async fn scenario_c_unknown_product_rejects_whole_batch() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let engine = h.engine();

    let err = engine
        .reserve(vec![h.line("SKU1", 2), h.line("NO-SUCH-SKU", 1)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReservationError::ProductNotInWarehouse { line: 1, .. }
    ));
    assert_eq!(err.code(), "product_not_in_warehouse");
    assert_eq!(h.reserved("SKU1").await, 0);
}

#[tokio::test]
async fn scenario_d_blocked_warehouse_never_touches_the_ledger() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    h.directory.set_availability(h.warehouse, false).await.unwrap();

    let (backend, begins) = ScriptedBackend::new(h.backend.clone(), Mode::PassThrough);
    let engine = h.engine_over(Arc::new(backend), EngineConfig::default());

    let err = engine.reserve(vec![h.line("SKU1", 1)]).await.unwrap_err();
    assert_eq!(
        err,
        ReservationError::WarehouseUnavailable {
            line: 0,
            warehouse_id: h.warehouse
        }
    );
    assert_eq!(begins.load(Ordering::SeqCst), 0);

    h.directory.set_availability(h.warehouse, true).await.unwrap();
    engine.reserve(vec![h.line("SKU1", 1)]).await.unwrap();
    assert_eq!(begins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_invalid_line_mutates_nothing() {
    let h = Harness::new(&[("SKU1", 10), ("SKU2", 3), ("SKU3", 10)]).await;
    let before: Vec<StockRecord> = h.ledger.list_warehouse(h.warehouse).await.unwrap();

    let err = h
        .engine()
        .reserve(vec![h.line("SKU1", 1), h.line("SKU2", 4), h.line("SKU3", 1)])
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::InsufficientStock { line: 1, .. }));
    assert_eq!(h.ledger.list_warehouse(h.warehouse).await.unwrap(), before);
}

#[tokio::test]
async fn dropped_session_rolls_back() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let record = h.record("SKU1").await;

    {
        let mut session = h.ledger.session().await.unwrap();
        session
            .apply_batch(&[StockMutation {
                record_id: record.id(),
                warehouse_id: record.warehouse_id(),
                product_id: record.product_id(),
                expected_version: warehousing_core::ExpectedVersion::Exact(record.version()),
                new_reserved: 9,
            }])
            .await
            .unwrap();
    }

    let after = h.record("SKU1").await;
    assert_eq!(after, record);
}

#[tokio::test]
async fn cancelled_request_leaves_ledger_unchanged() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let (backend, _) = ScriptedBackend::new(h.backend.clone(), Mode::StallOnCommit);
    let engine = h.engine_over(Arc::new(backend), EngineConfig::default());

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        engine.reserve(vec![h.line("SKU1", 5)]),
    )
    .await;

    assert!(outcome.is_err(), "request should have been cancelled");
    assert_eq!(h.reserved("SKU1").await, 0);

    // The cancelled request did not wedge the record.
    h.engine().reserve(vec![h.line("SKU1", 5)]).await.unwrap();
    assert_eq!(h.reserved("SKU1").await, 5);
}

#[tokio::test]
async fn storage_failure_is_not_retried() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let (backend, begins) = ScriptedBackend::new(h.backend.clone(), Mode::FailOnBegin);
    let engine = h.engine_over(Arc::new(backend), EngineConfig::default());

    let err = engine.reserve(vec![h.line("SKU1", 1)]).await.unwrap_err();
    assert!(matches!(err, ReservationError::StorageUnavailable(_)));
    assert_eq!(err.outcome(), RequestState::Failed);
    assert_eq!(begins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn persistent_conflicts_fail_after_bounded_retries() {
    let h = Harness::new(&[("SKU1", 10)]).await;
    let (backend, begins) = ScriptedBackend::new(h.backend.clone(), Mode::ConflictOnCommit);
    let config = EngineConfig {
        max_retries: 2,
        retry_backoff: Duration::from_millis(1),
    };
    let engine = h.engine_over(Arc::new(backend), config);

    let err = engine.reserve(vec![h.line("SKU1", 1)]).await.unwrap_err();
    assert!(matches!(
        err,
        ReservationError::ConcurrencyConflict { attempts: 3, .. }
    ));
    assert_eq!(err.outcome(), RequestState::Failed);
    assert_eq!(begins.load(Ordering::SeqCst), 3);
    assert_eq!(h.reserved("SKU1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_reservations_exceeding_stock_never_both_succeed() {
    for _ in 0..25 {
        let h = Harness::new(&[("SKU1", 10)]).await;
        let engine = h.engine();

        let a = {
            let engine = engine.clone();
            let lines = vec![h.line("SKU1", 6)];
            tokio::spawn(async move { engine.reserve(lines).await })
        };
        let b = {
            let engine = engine.clone();
            let lines = vec![h.line("SKU1", 6)];
            tokio::spawn(async move { engine.reserve(lines).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1, "exactly one reservation must win: {results:?}");
        for rejected in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(
                rejected,
                ReservationError::InsufficientStock { .. }
                    | ReservationError::ConcurrencyConflict { .. }
            ));
        }
        assert_eq!(h.reserved("SKU1").await, 6);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_single_unit_reservations_never_oversell() {
    let h = Harness::new(&[("SKU1", 10), ("SKU2", 100)]).await;
    let engine = h.engine_over(
        Arc::new(h.backend.clone()),
        EngineConfig {
            max_retries: 50,
            retry_backoff: Duration::from_millis(1),
        },
    );

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        let lines = vec![h.line("SKU1", 1), h.line("SKU2", 1)];
        tasks.push(tokio::spawn(async move { engine.reserve(lines).await }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(
                matches!(e, ReservationError::InsufficientStock { line: 0, .. }),
                "unexpected failure: {e}"
            ),
        }
    }

    assert_eq!(successes, 10);
    let sku1 = h.record("SKU1").await;
    assert_eq!(sku1.reserved_quantity(), 10);
    assert!(sku1.reserved_quantity() <= sku1.quantity());
    assert_eq!(h.reserved("SKU2").await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_batches_proceed_independently() {
    let h = Harness::new(&[("SKU1", 5), ("SKU2", 5)]).await;
    let engine = h.engine();

    let a = {
        let engine = engine.clone();
        let lines = vec![h.line("SKU1", 5)];
        tokio::spawn(async move { engine.reserve(lines).await })
    };
    let b = {
        let engine = engine.clone();
        let lines = vec![h.line("SKU2", 5)];
        tokio::spawn(async move { engine.reserve(lines).await })
    };

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
    assert_eq!(h.reserved("SKU1").await, 5);
    assert_eq!(h.reserved("SKU2").await, 5);
}

#[tokio::test]
async fn restock_raises_quantity_but_write_off_respects_reservations() {
    let h = Harness::new(&[("SKU1", 4)]).await;
    let engine = h.engine();
    engine.reserve(vec![h.line("SKU1", 4)]).await.unwrap();
    assert!(engine.reserve(vec![h.line("SKU1", 1)]).await.is_err());

    let product = h.product("SKU1").await;
    let restocked = h.ledger.restock(h.warehouse, &product, 6).await.unwrap();
    assert_eq!(restocked.quantity(), 10);
    assert_eq!(restocked.reserved_quantity(), 4);
    engine.reserve(vec![h.line("SKU1", 1)]).await.unwrap();

    let err = h.ledger.restock(h.warehouse, &product, -6).await.unwrap_err();
    assert!(matches!(err, LedgerError::Stock(_)));
    assert_eq!(h.record("SKU1").await.quantity(), 10);
}

/// Same pipeline over Postgres. Needs a live database:
/// `DATABASE_URL=postgres://… cargo test -p warehousing-infra -- --ignored`.
mod postgres {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db;
    use crate::ledger::PostgresLedgerBackend;
    use crate::master_data::PostgresMasterData;

    struct Live {
        engine: ReservationEngine,
        ledger: InventoryLedger,
        warehouse: WarehouseId,
        code: ProductCode,
    }

    impl Live {
        async fn reserved(&self) -> i64 {
            self.ledger
                .get(self.warehouse, &self.code)
                .await
                .unwrap()
                .reserved_quantity()
        }

        fn line(&self, quantity: i64) -> LineItem {
            LineItem::new(self.code.clone(), self.warehouse, quantity)
        }
    }

    /// A fresh warehouse with 10 units of a fresh product.
    async fn live() -> Option<Live> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = db::connect(&DatabaseConfig {
            url,
            max_connections: 8,
        })
        .await
        .unwrap();
        db::bootstrap_schema(&pool).await.unwrap();

        let directory = Arc::new(PostgresMasterData::new(pool.clone()));
        let ledger = InventoryLedger::new(Arc::new(PostgresLedgerBackend::new(pool)));
        let warehouse = directory
            .register_warehouse(NewWarehouse::new("Live"))
            .await
            .unwrap()
            .id;
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let code = ProductCode::parse(format!("LIVE-{nanos}")).unwrap();
        let product = directory
            .register_product(NewProduct {
                name: "Live product".into(),
                size: "M".into(),
                code: code.clone(),
            })
            .await
            .unwrap();
        ledger.restock(warehouse, &product, 10).await.unwrap();

        let engine = ReservationEngine::new(ledger.clone(), directory, EngineConfig::default());
        Some(Live {
            engine,
            ledger,
            warehouse,
            code,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL"]
    async fn locked_rows_admit_only_one_of_two_oversized_reservations() {
        let Some(live) = live().await else { return };

        let a = {
            let engine = live.engine.clone();
            let lines = vec![live.line(6)];
            tokio::spawn(async move { engine.reserve(lines).await })
        };
        let b = {
            let engine = live.engine.clone();
            let lines = vec![live.line(6)];
            tokio::spawn(async move { engine.reserve(lines).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
        assert_eq!(live.reserved().await, 6);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn stale_version_write_conflicts_and_rolls_back() {
        let Some(live) = live().await else { return };
        let record = live.ledger.get(live.warehouse, &live.code).await.unwrap();

        let mut session = live.ledger.session().await.unwrap();
        let err = session
            .apply_batch(&[StockMutation {
                record_id: record.id(),
                warehouse_id: record.warehouse_id(),
                product_id: record.product_id(),
                expected_version: warehousing_core::ExpectedVersion::Exact(record.version() + 5),
                new_reserved: 1,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict(_)));
        session.abandon().await;

        assert_eq!(live.ledger.get(live.warehouse, &live.code).await.unwrap(), record);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn dropped_session_discards_writes() {
        let Some(live) = live().await else { return };
        let record = live.ledger.get(live.warehouse, &live.code).await.unwrap();

        {
            let mut session = live.ledger.session().await.unwrap();
            session
                .apply_batch(&[StockMutation {
                    record_id: record.id(),
                    warehouse_id: record.warehouse_id(),
                    product_id: record.product_id(),
                    expected_version: warehousing_core::ExpectedVersion::Exact(record.version()),
                    new_reserved: 9,
                }])
                .await
                .unwrap();
        }

        assert_eq!(live.reserved().await, 0);
        live.engine.reserve(vec![live.line(4)]).await.unwrap();
        assert_eq!(live.reserved().await, 4);
    }
}
