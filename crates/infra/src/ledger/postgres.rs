//! Postgres-backed ledger.
//!
//! Each [`LedgerTransaction`] is one `READ COMMITTED` sqlx transaction.
//! Same-record writers serialize on row locks:
//!
//! - `read_record` takes `SELECT ... FOR UPDATE` on the stock row, so a
//!   concurrent batch touching that row waits until this one commits or rolls
//!   back and then reads the committed `reserved_quantity`.
//! - Callers lock rows in ascending `(warehouse_id, product_code)` order (see
//!   `LookupIndex`), which keeps two overlapping batches from deadlocking.
//! - Every `UPDATE` is additionally guarded by `version`, so a writer that did
//!   not lock first still cannot overwrite a newer row.
//!
//! A dropped `sqlx::Transaction` is rolled back by sqlx when its connection
//! returns to the pool.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (serialization failure) | `40001` | `ConcurrencyConflict` |
//! | Database (deadlock detected) | `40P01` | `ConcurrencyConflict` |
//! | Database (unique violation) | `23505` | `ConcurrencyConflict` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) / PoolClosed / PoolTimedOut / Io / other | any | `StorageUnavailable` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use warehousing_core::{ExpectedVersion, ProductId, StockRecordId, WarehouseId};
use warehousing_inventory::{ProductCode, StockMutation, StockRecord, StockRecordParts};

use super::{LedgerBackend, LedgerError, LedgerTransaction, QuantityChange, StockKey};

const RECORD_COLUMNS: &str =
    "s.id, s.warehouse_id, s.product_id, p.code, s.quantity, s.reserved_quantity, s.version, s.updated_at";

#[derive(Debug, Clone)]
pub struct PostgresLedgerBackend {
    pool: PgPool,
}

impl PostgresLedgerBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerBackend for PostgresLedgerBackend {
    #[instrument(skip_all, err)]
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresLedgerTransaction { tx }))
    }
}

struct PostgresLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresLedgerTransaction {
    async fn read_record(&mut self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} \
             FROM stock_records s JOIN products p ON p.id = s.product_id \
             WHERE s.warehouse_id = $1 AND p.code = $2 \
             FOR UPDATE OF s"
        );
        let row = sqlx::query(&sql)
            .bind(key.warehouse_id.get())
            .bind(key.product_code.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("read_record", e))?;

        row.map(|r| decode(&r)).transpose()
    }

    async fn read_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} \
             FROM stock_records s JOIN products p ON p.id = s.product_id \
             WHERE s.warehouse_id = $1 \
             ORDER BY p.code ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(warehouse_id.get())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("read_warehouse", e))?;

        rows.iter().map(decode).collect()
    }

    async fn write_records(
        &mut self,
        mutations: &[StockMutation],
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let mut written = Vec::with_capacity(mutations.len());
        for m in mutations {
            let ExpectedVersion::Exact(expected) = m.expected_version else {
                return Err(LedgerError::ConcurrencyConflict(format!(
                    "stock record {} expected to be absent",
                    m.record_id
                )));
            };
            let row = sqlx::query(
                r#"
                WITH s AS (
                    UPDATE stock_records
                    SET reserved_quantity = $1, version = version + 1, updated_at = now()
                    WHERE id = $2 AND version = $3
                    RETURNING id, warehouse_id, product_id, quantity, reserved_quantity, version, updated_at
                )
                SELECT s.id, s.warehouse_id, s.product_id, p.code, s.quantity, s.reserved_quantity, s.version, s.updated_at
                FROM s JOIN products p ON p.id = s.product_id
                "#,
            )
            .bind(m.new_reserved)
            .bind(m.record_id.get())
            .bind(to_db_version(expected)?)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("write_records", e))?;

            match row {
                Some(row) => written.push(decode(&row)?),
                None => return Err(self.explain_missed_update(m.record_id).await),
            }
        }
        debug!(records = written.len(), "stock rows updated");
        Ok(written)
    }

    async fn write_quantity(&mut self, change: &QuantityChange) -> Result<StockRecord, LedgerError> {
        let row = match change.expected_version {
            ExpectedVersion::Absent => sqlx::query(
                r#"
                WITH s AS (
                    INSERT INTO stock_records (warehouse_id, product_id, quantity, reserved_quantity, version, updated_at)
                    VALUES ($1, $2, $3, 0, 1, now())
                    RETURNING id, warehouse_id, product_id, quantity, reserved_quantity, version, updated_at
                )
                SELECT s.id, s.warehouse_id, s.product_id, p.code, s.quantity, s.reserved_quantity, s.version, s.updated_at
                FROM s JOIN products p ON p.id = s.product_id
                "#,
            )
            .bind(change.warehouse_id.get())
            .bind(change.product_id.get())
            .bind(change.quantity)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_stock", e))?,
            ExpectedVersion::Exact(version) => sqlx::query(
                r#"
                WITH s AS (
                    UPDATE stock_records
                    SET quantity = $1, version = version + 1, updated_at = now()
                    WHERE warehouse_id = $2 AND product_id = $3 AND version = $4
                    RETURNING id, warehouse_id, product_id, quantity, reserved_quantity, version, updated_at
                )
                SELECT s.id, s.warehouse_id, s.product_id, p.code, s.quantity, s.reserved_quantity, s.version, s.updated_at
                FROM s JOIN products p ON p.id = s.product_id
                "#,
            )
            .bind(change.quantity)
            .bind(change.warehouse_id.get())
            .bind(change.product_id.get())
            .bind(to_db_version(version)?)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_quantity", e))?,
        };

        match row {
            Some(row) => decode(&row),
            None => Err(LedgerError::ConcurrencyConflict(format!(
                "stock for product {} in warehouse {} changed concurrently",
                change.product_code, change.warehouse_id
            ))),
        }
    }

    #[instrument(skip_all, err)]
    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

impl PostgresLedgerTransaction {
    /// Distinguish a missing row from a version mismatch after an UPDATE hit nothing.
    async fn explain_missed_update(&mut self, id: StockRecordId) -> LedgerError {
        let found = sqlx::query("SELECT version FROM stock_records WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await;
        match found {
            Ok(Some(_)) => LedgerError::ConcurrencyConflict(format!(
                "stock record {id} changed since it was read"
            )),
            Ok(None) => LedgerError::NotFound(format!("stock record {id}")),
            Err(e) => map_sqlx_error("write_records", e),
        }
    }
}

#[derive(Debug)]
struct StockRow {
    id: i64,
    warehouse_id: i64,
    product_id: i64,
    code: String,
    quantity: i64,
    reserved_quantity: i64,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StockRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockRow {
            id: row.try_get("id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            product_id: row.try_get("product_id")?,
            code: row.try_get("code")?,
            quantity: row.try_get("quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<StockRow> for StockRecord {
    type Error = LedgerError;

    fn try_from(row: StockRow) -> Result<Self, Self::Error> {
        let product_code = ProductCode::parse(&row.code)
            .map_err(|e| LedgerError::StorageUnavailable(format!("bad product code in row {}: {e}", row.id)))?;
        let version = u64::try_from(row.version)
            .map_err(|_| LedgerError::StorageUnavailable(format!("negative version in row {}", row.id)))?;
        Ok(StockRecord::from_parts(StockRecordParts {
            id: StockRecordId::new(row.id),
            warehouse_id: WarehouseId::new(row.warehouse_id),
            product_id: ProductId::new(row.product_id),
            product_code,
            quantity: row.quantity,
            reserved_quantity: row.reserved_quantity,
            version,
            updated_at: row.updated_at,
        })?)
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<StockRecord, LedgerError> {
    let row = StockRow::from_row(row)
        .map_err(|e| LedgerError::StorageUnavailable(format!("failed to decode stock row: {e}")))?;
    StockRecord::try_from(row)
}

fn to_db_version(version: u64) -> Result<i64, LedgerError> {
    i64::try_from(version)
        .map_err(|_| LedgerError::Constraint(format!("version {version} out of range")))
}

/// Map SQLx errors to ledger errors (see module docs).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("23505") => LedgerError::ConcurrencyConflict(msg),
                Some("23514") => LedgerError::Constraint(msg),
                Some("23503") => LedgerError::NotFound(msg),
                _ => LedgerError::StorageUnavailable(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            LedgerError::NotFound(format!("unexpected row not found in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::StorageUnavailable(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::StorageUnavailable(format!("sqlx error in {operation}: {other}")),
    }
}
