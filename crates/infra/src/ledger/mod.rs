//! Inventory ledger: durable, transactional storage of stock records.
//!
//! The ledger is split in two layers:
//!
//! - [`LedgerBackend`] / [`LedgerTransaction`]: the persistence contract
//!   (`begin`, `read_record`, `write_records`, `commit`, `rollback`), implemented
//!   by [`InMemoryLedgerBackend`] and [`PostgresLedgerBackend`].
//! - [`InventoryLedger`] / [`LedgerSession`]: the domain-facing API used by the
//!   reservation engine and the HTTP layer.
//!
//! ## Sessions
//!
//! A [`LedgerSession`] wraps one backend transaction. Reads and writes made
//! through the session share that transaction, so a lookup, the validation read
//! and the final write all see one coherent view.
//!
//! `commit()` consumes the session. Any other exit path (an early `return`, a
//! `?`, a dropped future after cancellation) drops the session, and dropping a
//! session without committing discards its writes.
//!
//! ## Batches
//!
//! `apply_batch` takes ordered [`StockMutation`]s. Mutations that target the
//! same record are coalesced before they reach the backend; the last one wins.
//! Every mutation carries the version its candidate was computed from, and a
//! version mismatch surfaces as [`LedgerError::ConcurrencyConflict`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use warehousing_core::{ExpectedVersion, ProductId, WarehouseId};
use warehousing_inventory::{Product, ProductCode, StockError, StockMutation, StockRecord};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedgerBackend;
pub use postgres::PostgresLedgerBackend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced stock record does not exist.
    #[error("stock record not found: {0}")]
    NotFound(String),

    /// Another writer changed a touched record first.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The storage backend failed (connection, IO, poisoned lock).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The storage layer refused a write that would break the stock invariant.
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error(transparent)]
    Stock(#[from] StockError),
}

/// Natural key of a stock record, as used by reservation traffic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StockKey {
    pub warehouse_id: WarehouseId,
    pub product_code: ProductCode,
}

impl StockKey {
    pub fn new(warehouse_id: WarehouseId, product_code: ProductCode) -> Self {
        Self {
            warehouse_id,
            product_code,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "warehouse {} / product {}", self.warehouse_id, self.product_code)
    }
}

/// On-hand quantity write issued by restocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityChange {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub product_code: ProductCode,
    /// New absolute on-hand quantity.
    pub quantity: i64,
    /// `Absent` creates the record; `Exact(v)` updates it if still at version `v`.
    pub expected_version: ExpectedVersion,
}

/// Persistence backend for stock records.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError>;
}

/// One open backend transaction.
///
/// Dropping a transaction without calling [`commit`](LedgerTransaction::commit)
/// must discard every write made through it.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Read a record by natural key. Backends with row locks lock it for the
    /// rest of the transaction.
    async fn read_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError>;

    async fn read_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, LedgerError>;

    /// Write new reserved quantities. Mutations are distinct per record.
    async fn write_records(
        &mut self,
        mutations: &[StockMutation],
    ) -> Result<Vec<StockRecord>, LedgerError>;

    async fn write_quantity(&mut self, change: &QuantityChange) -> Result<StockRecord, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Domain-facing handle on the ledger. Cheap to clone.
#[derive(Clone)]
pub struct InventoryLedger {
    backend: Arc<dyn LedgerBackend>,
}

impl core::fmt::Debug for InventoryLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InventoryLedger").finish_non_exhaustive()
    }
}

impl InventoryLedger {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self { backend }
    }

    /// Open a scoped session (one backend transaction).
    pub async fn session(&self) -> Result<LedgerSession, LedgerError> {
        let tx = self.backend.begin().await?;
        Ok(LedgerSession { tx: Some(tx) })
    }

    /// Point lookup of one record.
    pub async fn get(
        &self,
        warehouse_id: WarehouseId,
        product_code: &ProductCode,
    ) -> Result<StockRecord, LedgerError> {
        let mut session = self.session().await?;
        let record = session.get(warehouse_id, product_code).await;
        session.rollback().await?;
        record
    }

    /// Apply `mutations` in a session of their own: all or nothing.
    pub async fn apply_batch(
        &self,
        mutations: &[StockMutation],
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let mut session = self.session().await?;
        let written = session.apply_batch(mutations).await?;
        session.commit().await?;
        Ok(written)
    }

    /// Add `delta` to the on-hand quantity of `product` in `warehouse_id`,
    /// creating the record on first stocking.
    pub async fn restock(
        &self,
        warehouse_id: WarehouseId,
        product: &Product,
        delta: i64,
    ) -> Result<StockRecord, LedgerError> {
        let mut session = self.session().await?;
        let record = session.restock(warehouse_id, product, delta).await?;
        session.commit().await?;
        Ok(record)
    }

    pub async fn list_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let mut session = self.session().await?;
        let records = session.list_warehouse(warehouse_id).await;
        session.rollback().await?;
        records
    }
}

/// A scoped ledger transaction. Rolled back unless [`commit`](Self::commit) succeeds.
pub struct LedgerSession {
    tx: Option<Box<dyn LedgerTransaction>>,
}

impl LedgerSession {
    fn tx(&mut self) -> Result<&mut (dyn LedgerTransaction + 'static), LedgerError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| LedgerError::StorageUnavailable("ledger session already closed".into()))
    }

    pub async fn find(&mut self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        self.tx()?.read_record(key).await
    }

    pub async fn get(
        &mut self,
        warehouse_id: WarehouseId,
        product_code: &ProductCode,
    ) -> Result<StockRecord, LedgerError> {
        let key = StockKey::new(warehouse_id, product_code.clone());
        self.find(&key)
            .await?
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))
    }

    pub async fn list_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        self.tx()?.read_warehouse(warehouse_id).await
    }

    #[instrument(skip(self, mutations), fields(mutations = mutations.len()), err)]
    pub async fn apply_batch(
        &mut self,
        mutations: &[StockMutation],
    ) -> Result<Vec<StockRecord>, LedgerError> {
        for m in mutations {
            if m.new_reserved < 0 {
                return Err(StockError::InvariantViolation {
                    quantity: 0,
                    reserved: m.new_reserved,
                }
                .into());
            }
        }
        let coalesced = coalesce(mutations);
        debug!(distinct_records = coalesced.len(), "writing stock mutations");
        self.tx()?.write_records(&coalesced).await
    }

    pub async fn restock(
        &mut self,
        warehouse_id: WarehouseId,
        product: &Product,
        delta: i64,
    ) -> Result<StockRecord, LedgerError> {
        let key = StockKey::new(warehouse_id, product.code.clone());
        let change = match self.find(&key).await? {
            Some(current) => {
                let next = current.restocked(delta, chrono::Utc::now())?;
                QuantityChange {
                    warehouse_id,
                    product_id: product.id,
                    product_code: product.code.clone(),
                    quantity: next.quantity(),
                    expected_version: ExpectedVersion::Exact(current.version()),
                }
            }
            None => {
                if delta < 0 {
                    return Err(StockError::InsufficientStock {
                        requested: -delta,
                        reserved: 0,
                        quantity: 0,
                    }
                    .into());
                }
                QuantityChange {
                    warehouse_id,
                    product_id: product.id,
                    product_code: product.code.clone(),
                    quantity: delta,
                    expected_version: ExpectedVersion::Absent,
                }
            }
        };
        self.tx()?.write_quantity(&change).await
    }

    /// Make every write of this session durable and visible.
    pub async fn commit(mut self) -> Result<(), LedgerError> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Err(LedgerError::StorageUnavailable(
                "ledger session already closed".into(),
            )),
        }
    }

    /// Discard every write of this session.
    pub async fn rollback(mut self) -> Result<(), LedgerError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }

    /// Roll back, logging instead of returning a failure. Used on paths that
    /// already carry a more relevant error.
    pub async fn abandon(self) {
        if let Err(e) = self.rollback().await {
            warn!(error = %e, "ledger rollback failed");
        }
    }
}

impl Drop for LedgerSession {
    fn drop(&mut self) {
        if self.tx.is_some() {
            debug!("ledger session dropped before commit; discarding writes");
        }
    }
}

/// Collapse mutations on the same record into the last one, keeping the
/// position of its first occurrence.
fn coalesce(mutations: &[StockMutation]) -> Vec<StockMutation> {
    let mut out: Vec<StockMutation> = Vec::with_capacity(mutations.len());
    for m in mutations {
        match out.iter_mut().find(|o| o.record_id == m.record_id) {
            Some(existing) => *existing = m.clone(),
            None => out.push(m.clone()),
        }
    }
    out
}
