//! Reservation engine: applies reserve / release batches as all-or-nothing units.
//!
//! ## Request lifecycle
//!
//! ```text
//! Received
//!   ↓  (reserve only) every referenced warehouse must accept reservations
//! Resolving   lines → stock records, via LookupIndex inside one ledger session
//!   ↓
//! Validating  every line checked against that one snapshot (plan_batch)
//!   ↓
//! Committing  planned reserved quantities written, session committed
//!   ↓
//! Committed | Rejected | Failed
//! ```
//!
//! Warehouse availability is read from master data before any ledger session
//! is opened, so a reservation against a blocked warehouse never touches the
//! ledger.
//!
//! A `ConcurrencyConflict` from the ledger restarts the request from
//! `Resolving` with a fresh session, at most `max_retries` times. Every other
//! error is terminal. A storage failure is returned as-is and never retried.
//!
//! The ledger session is scoped to one attempt. Rejections and ledger errors
//! roll it back explicitly. If the caller drops the future mid-attempt the
//! session is dropped with it, which discards its writes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use warehousing_core::WarehouseId;
use warehousing_inventory::{
    plan_batch, BatchKind, BatchRejection, BatchRequest, LineItem, ProductCode, StockRecord,
};

use crate::ledger::{InventoryLedger, LedgerError};
use crate::lookup::{LookupError, LookupIndex};
use crate::master_data::{DirectoryError, MasterDataDirectory};

/// Per-request state, logged on every transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Resolving,
    Validating,
    Committing,
    Committed,
    Rejected,
    Failed,
}

impl RequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::Resolving => "resolving",
            RequestState::Validating => "validating",
            RequestState::Committing => "committing",
            RequestState::Committed => "committed",
            RequestState::Rejected => "rejected",
            RequestState::Failed => "failed",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// Malformed request: no lines, or a non-positive quantity.
    #[error("invalid request: {0}")]
    Validation(BatchRejection),

    #[error("line {line}: warehouse {warehouse_id} not found")]
    WarehouseNotFound { line: usize, warehouse_id: WarehouseId },

    #[error("line {line}: warehouse {warehouse_id} is not accepting reservations")]
    WarehouseUnavailable { line: usize, warehouse_id: WarehouseId },

    #[error("line {line}: product '{product_code}' is not stocked in warehouse {warehouse_id}")]
    ProductNotInWarehouse {
        line: usize,
        warehouse_id: WarehouseId,
        product_code: ProductCode,
    },

    #[error("line {line}: insufficient stock (requested {requested}, reserved {reserved}, on hand {quantity})")]
    InsufficientStock {
        line: usize,
        requested: i64,
        reserved: i64,
        quantity: i64,
    },

    #[error("line {line}: cannot release {requested}, only {reserved} reserved")]
    OverRelease {
        line: usize,
        requested: i64,
        reserved: i64,
    },

    /// Conflicts persisted through every retry.
    #[error("concurrency conflict after {attempts} attempts: {message}")]
    ConcurrencyConflict { attempts: u32, message: String },

    /// A resolved stock record was gone by the time it was written.
    #[error("stock record not found: {0}")]
    RecordNotFound(String),

    /// Storage refused a write that would break `0 <= reserved <= quantity`.
    #[error("stock invariant violated: {0}")]
    InvariantViolation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ReservationError {
    /// Terminal state this error leaves the request in.
    pub fn outcome(&self) -> RequestState {
        match self {
            ReservationError::ConcurrencyConflict { .. }
            | ReservationError::RecordNotFound(_)
            | ReservationError::InvariantViolation(_)
            | ReservationError::StorageUnavailable(_) => RequestState::Failed,
            _ => RequestState::Rejected,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::Validation(_) => "validation_error",
            ReservationError::WarehouseNotFound { .. } => "not_found",
            ReservationError::WarehouseUnavailable { .. } => "warehouse_unavailable",
            ReservationError::ProductNotInWarehouse { .. } => "product_not_in_warehouse",
            ReservationError::InsufficientStock { .. } => "insufficient_stock",
            ReservationError::OverRelease { .. } => "over_release",
            ReservationError::ConcurrencyConflict { .. } => "concurrency_conflict",
            ReservationError::RecordNotFound(_) => "not_found",
            ReservationError::InvariantViolation(_) => "invariant_violation",
            ReservationError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// Zero-based index of the first failing line, when one is to blame.
    pub fn line(&self) -> Option<usize> {
        match self {
            ReservationError::Validation(r) => r.line(),
            ReservationError::WarehouseNotFound { line, .. }
            | ReservationError::WarehouseUnavailable { line, .. }
            | ReservationError::ProductNotInWarehouse { line, .. }
            | ReservationError::InsufficientStock { line, .. }
            | ReservationError::OverRelease { line, .. } => Some(*line),
            ReservationError::ConcurrencyConflict { .. }
            | ReservationError::RecordNotFound(_)
            | ReservationError::InvariantViolation(_)
            | ReservationError::StorageUnavailable(_) => None,
        }
    }
}

impl From<BatchRejection> for ReservationError {
    fn from(rejection: BatchRejection) -> Self {
        match rejection {
            BatchRejection::InsufficientStock {
                line,
                requested,
                reserved,
                quantity,
            } => ReservationError::InsufficientStock {
                line,
                requested,
                reserved,
                quantity,
            },
            BatchRejection::OverRelease {
                line,
                requested,
                reserved,
            } => ReservationError::OverRelease {
                line,
                requested,
                reserved,
            },
            other => ReservationError::Validation(other),
        }
    }
}

impl From<DirectoryError> for ReservationError {
    fn from(err: DirectoryError) -> Self {
        ReservationError::StorageUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Extra attempts after a concurrency conflict.
    pub max_retries: u32,
    /// Sleep before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl EngineConfig {
    /// Sleep before retry number `attempt`, saturating instead of overflowing.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(5),
        }
    }
}

/// Confirmation of one committed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptLine {
    pub line: usize,
    pub product_code: ProductCode,
    pub warehouse_id: WarehouseId,
    /// Units this line asked to reserve or release.
    pub requested: i64,
    /// On-hand quantity of the record after the commit.
    pub on_hand: i64,
    pub reserved_quantity: i64,
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub kind: BatchKind,
    pub lines: Vec<ReceiptLine>,
    pub attempts: u32,
}

enum Attempt {
    Done(BatchReceipt),
    Conflict(String),
}

/// Applies reservation and release batches to the ledger.
#[derive(Clone)]
pub struct ReservationEngine {
    ledger: InventoryLedger,
    directory: Arc<dyn MasterDataDirectory>,
    lookup: LookupIndex,
    config: EngineConfig,
}

impl core::fmt::Debug for ReservationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReservationEngine {
    pub fn new(
        ledger: InventoryLedger,
        directory: Arc<dyn MasterDataDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            directory,
            lookup: LookupIndex::new(),
            config,
        }
    }

    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    pub async fn reserve(&self, lines: Vec<LineItem>) -> Result<BatchReceipt, ReservationError> {
        self.submit(BatchRequest::reserve(lines)?).await
    }

    pub async fn release(&self, lines: Vec<LineItem>) -> Result<BatchReceipt, ReservationError> {
        self.submit(BatchRequest::release(lines)?).await
    }

    /// Run one batch to a terminal state.
    #[instrument(
        skip(self, request),
        fields(kind = %request.kind(), lines = request.lines().len())
    )]
    pub async fn submit(&self, request: BatchRequest) -> Result<BatchReceipt, ReservationError> {
        transition(RequestState::Received);

        let result = self.run(&request).await;
        match &result {
            Ok(receipt) => info!(
                state = RequestState::Committed.as_str(),
                attempts = receipt.attempts,
                "batch committed"
            ),
            Err(e) => warn!(
                state = e.outcome().as_str(),
                code = e.code(),
                line = e.line(),
                error = %e,
                "batch not applied"
            ),
        }
        result
    }

    async fn run(&self, request: &BatchRequest) -> Result<BatchReceipt, ReservationError> {
        if request.kind() == BatchKind::Reserve {
            self.check_availability(request.lines()).await?;
        }

        let mut attempt = 1;
        loop {
            match self.attempt(request, attempt).await? {
                Attempt::Done(receipt) => return Ok(receipt),
                Attempt::Conflict(message) if attempt > self.config.max_retries => {
                    return Err(ReservationError::ConcurrencyConflict {
                        attempts: attempt,
                        message,
                    });
                }
                Attempt::Conflict(message) => {
                    debug!(attempt, %message, "concurrency conflict; retrying");
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Every referenced warehouse must exist and accept reservations. Lines are
    /// walked in order, so the first line naming an offending warehouse is
    /// the one reported.
    async fn check_availability(&self, lines: &[LineItem]) -> Result<(), ReservationError> {
        let mut checked = BTreeSet::new();
        for (line, item) in lines.iter().enumerate() {
            let warehouse_id = item.warehouse_id;
            if !checked.insert(warehouse_id) {
                continue;
            }
            match self.directory.warehouse(warehouse_id).await? {
                None => return Err(ReservationError::WarehouseNotFound { line, warehouse_id }),
                Some(w) if !w.accepts_reservations() => {
                    return Err(ReservationError::WarehouseUnavailable { line, warehouse_id });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn attempt(
        &self,
        request: &BatchRequest,
        attempt: u32,
    ) -> Result<Attempt, ReservationError> {
        let mut session = match self.ledger.session().await {
            Ok(session) => session,
            Err(e) => return retry_or_fail(e),
        };

        transition(RequestState::Resolving);
        let snapshot = match self.lookup.resolve(&mut session, request.lines()).await {
            Ok(records) => records,
            Err(LookupError::ProductNotInWarehouse {
                line,
                warehouse_id,
                product_code,
            }) => {
                session.abandon().await;
                return Err(ReservationError::ProductNotInWarehouse {
                    line,
                    warehouse_id,
                    product_code,
                });
            }
            Err(LookupError::Ledger(e)) => {
                session.abandon().await;
                return retry_or_fail(e);
            }
        };

        transition(RequestState::Validating);
        let plan = match plan_batch(request, &snapshot) {
            Ok(plan) => plan,
            Err(rejection) => {
                session.abandon().await;
                return Err(rejection.into());
            }
        };

        transition(RequestState::Committing);
        let written = match session.apply_batch(&plan.mutations()).await {
            Ok(written) => written,
            Err(e) => {
                session.abandon().await;
                return retry_or_fail(e);
            }
        };
        if let Err(e) = session.commit().await {
            return retry_or_fail(e);
        }

        Ok(Attempt::Done(receipt(request, &snapshot, &written, attempt)))
    }
}

/// Conflicts end the attempt and ask for a retry; anything else fails the request.
fn retry_or_fail(err: LedgerError) -> Result<Attempt, ReservationError> {
    match err {
        LedgerError::ConcurrencyConflict(msg) => Ok(Attempt::Conflict(msg)),
        LedgerError::StorageUnavailable(msg) => Err(ReservationError::StorageUnavailable(msg)),
        LedgerError::NotFound(msg) => Err(ReservationError::RecordNotFound(msg)),
        LedgerError::Constraint(msg) => Err(ReservationError::InvariantViolation(msg)),
        LedgerError::Stock(e) => Err(ReservationError::InvariantViolation(e.to_string())),
    }
}

fn transition(state: RequestState) {
    debug!(state = state.as_str(), "reservation state");
}

/// Build per-line confirmations from the committed records. Duplicate lines
/// report the record's final state.
fn receipt(
    request: &BatchRequest,
    snapshot: &[StockRecord],
    written: &[StockRecord],
    attempts: u32,
) -> BatchReceipt {
    let lines = request
        .lines()
        .iter()
        .zip(snapshot)
        .enumerate()
        .map(|(line, (item, before))| {
            let after = written.iter().find(|w| w.id() == before.id()).unwrap_or(before);
            ReceiptLine {
                line,
                product_code: item.product_code.clone(),
                warehouse_id: item.warehouse_id,
                requested: item.quantity,
                on_hand: after.quantity(),
                reserved_quantity: after.reserved_quantity(),
            }
        })
        .collect();
    BatchReceipt {
        kind: request.kind(),
        lines,
        attempts,
    }
}
