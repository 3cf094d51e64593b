use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use warehousing_core::{ExpectedVersion, StockRecordId, WarehouseId};
use warehousing_inventory::{StockMutation, StockRecord, StockRecordParts};

use super::{LedgerBackend, LedgerError, LedgerTransaction, QuantityChange, StockKey};

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<StockRecordId, StockRecord>,
    by_key: HashMap<StockKey, StockRecordId>,
}

/// In-memory ledger with optimistic concurrency.
///
/// Transactions buffer their writes and remember the committed version of
/// every record they touch. `commit` re-checks those versions under the write
/// lock and applies everything at once, or nothing if any record moved.
///
/// Intended for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerBackend {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryLedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerBackend for InMemoryLedgerBackend {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        Ok(Box::new(InMemoryTransaction {
            tables: self.tables.clone(),
            next_id: self.next_id.clone(),
            observed: HashMap::new(),
            staged: BTreeMap::new(),
            created: BTreeMap::new(),
        }))
    }
}

struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
    /// Committed version of each existing record when this transaction first saw it.
    observed: HashMap<StockRecordId, u64>,
    /// Pending updates of existing records.
    staged: BTreeMap<StockRecordId, StockRecord>,
    /// Records first stocked in this transaction.
    created: BTreeMap<StockRecordId, StockRecord>,
}

fn poisoned() -> LedgerError {
    LedgerError::StorageUnavailable("ledger lock poisoned".to_string())
}

/// Pin a staged successor to `base + 1` however many times it was rewritten.
fn at_version(record: StockRecord, version: u64) -> Result<StockRecord, LedgerError> {
    Ok(StockRecord::from_parts(StockRecordParts {
        version,
        ..record.into_parts()
    })?)
}

impl InMemoryTransaction {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, LedgerError> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, LedgerError> {
        self.tables.write().map_err(|_| poisoned())
    }

    fn created_by_key(&self, key: &StockKey) -> Option<&StockRecord> {
        self.created.values().find(|r| {
            r.warehouse_id() == key.warehouse_id && r.product_code() == &key.product_code
        })
    }

    /// Current view of an existing record plus the committed version it is based on.
    fn current(&mut self, id: StockRecordId) -> Result<Option<(StockRecord, u64)>, LedgerError> {
        if let Some(staged) = self.staged.get(&id) {
            let base = self.observed.get(&id).copied().unwrap_or(staged.version());
            return Ok(Some((staged.clone(), base)));
        }
        let committed = self.read()?.records.get(&id).cloned();
        Ok(committed.map(|record| {
            let base = *self.observed.entry(id).or_insert(record.version());
            (record, base)
        }))
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn read_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        if let Some(created) = self.created_by_key(key) {
            return Ok(Some(created.clone()));
        }
        let id = self.read()?.by_key.get(key).copied();
        match id {
            Some(id) => Ok(self.current(id)?.map(|(record, _)| record)),
            None => Ok(None),
        }
    }

    async fn read_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let mut records: Vec<StockRecord> = {
            let tables = self.read()?;
            tables
                .records
                .values()
                .filter(|r| r.warehouse_id() == warehouse_id)
                .map(|r| self.staged.get(&r.id()).unwrap_or(r).clone())
                .collect()
        };
        records.extend(
            self.created
                .values()
                .filter(|r| r.warehouse_id() == warehouse_id)
                .cloned(),
        );
        records.sort_by(|a, b| a.product_code().cmp(b.product_code()));
        Ok(records)
    }

    async fn write_records(
        &mut self,
        mutations: &[StockMutation],
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let now = Utc::now();
        let mut pending = Vec::with_capacity(mutations.len());

        for m in mutations {
            if let Some(created) = self.created.get(&m.record_id) {
                if !m.expected_version.matches(Some(created.version())) {
                    return Err(LedgerError::ConcurrencyConflict(format!(
                        "record {} expected {}, found version {}",
                        m.record_id,
                        m.expected_version,
                        created.version()
                    )));
                }
                let next = at_version(created.with_reserved(m.new_reserved, now)?, created.version())?;
                pending.push((true, next));
                continue;
            }

            let (current, base) = self
                .current(m.record_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("stock record {}", m.record_id)))?;
            if !m.expected_version.matches(Some(base)) {
                return Err(LedgerError::ConcurrencyConflict(format!(
                    "record {} expected {}, found version {base}",
                    m.record_id, m.expected_version
                )));
            }
            let next = at_version(current.with_reserved(m.new_reserved, now)?, base + 1)?;
            pending.push((false, next));
        }

        let mut written = Vec::with_capacity(pending.len());
        for (is_new, record) in pending {
            written.push(record.clone());
            if is_new {
                self.created.insert(record.id(), record);
            } else {
                self.staged.insert(record.id(), record);
            }
        }
        Ok(written)
    }

    async fn write_quantity(&mut self, change: &QuantityChange) -> Result<StockRecord, LedgerError> {
        let now = Utc::now();
        let key = StockKey::new(change.warehouse_id, change.product_code.clone());

        let ExpectedVersion::Exact(expected) = change.expected_version else {
            let exists = self.created_by_key(&key).is_some() || self.read()?.by_key.contains_key(&key);
            if exists {
                return Err(LedgerError::ConcurrencyConflict(format!("{key} is already stocked")));
            }
            let id = StockRecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            let record = StockRecord::stocked(
                id,
                change.warehouse_id,
                change.product_id,
                change.product_code.clone(),
                change.quantity,
                now,
            )?;
            self.created.insert(id, record.clone());
            return Ok(record);
        };

        if let Some(created) = self.created_by_key(&key).cloned() {
            let next = at_version(
                created.restocked(change.quantity - created.quantity(), now)?,
                created.version(),
            )?;
            self.created.insert(next.id(), next.clone());
            return Ok(next);
        }

        let id = self
            .read()?
            .by_key
            .get(&key)
            .copied()
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
        let (current, base) = self
            .current(id)?
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
        if expected != base {
            return Err(LedgerError::ConcurrencyConflict(format!(
                "{key} expected version {expected}, found {base}"
            )));
        }
        let next = at_version(
            current.restocked(change.quantity - current.quantity(), now)?,
            base + 1,
        )?;
        self.staged.insert(id, next.clone());
        Ok(next)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let this = *self;
        let mut tables = this.write()?;

        for (id, record) in &this.staged {
            let committed = tables
                .records
                .get(id)
                .ok_or_else(|| LedgerError::NotFound(format!("stock record {id}")))?;
            let base = this.observed.get(id).copied().unwrap_or(0);
            if committed.version() != base {
                return Err(LedgerError::ConcurrencyConflict(format!(
                    "record {id} moved from version {base} to {} before commit",
                    committed.version()
                )));
            }
            debug_assert_eq!(record.version(), base + 1);
        }
        for record in this.created.values() {
            let key = StockKey::new(record.warehouse_id(), record.product_code().clone());
            if tables.by_key.contains_key(&key) {
                return Err(LedgerError::ConcurrencyConflict(format!("{key} is already stocked")));
            }
        }

        for (id, record) in &this.staged {
            tables.records.insert(*id, record.clone());
        }
        for (id, record) in &this.created {
            let key = StockKey::new(record.warehouse_id(), record.product_code().clone());
            tables.by_key.insert(key, *id);
            tables.records.insert(*id, record.clone());
        }

        debug!(
            updated = this.staged.len(),
            created = this.created.len(),
            "in-memory ledger commit"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        debug!(discarded = self.staged.len() + self.created.len(), "in-memory ledger rollback");
        Ok(())
    }
}
