//! Reservation / release batches and their pure validation.
//!
//! A batch is planned against one snapshot of the stock records its lines
//! resolve to. Each line is checked on its own against that snapshot; lines
//! that hit the same record are not summed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use warehousing_core::{ExpectedVersion, ProductId, StockRecordId, WarehouseId};

use crate::product::ProductCode;
use crate::stock::{StockError, StockRecord};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Reserve,
    Release,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Reserve => "reserve",
            BatchKind::Release => "release",
        }
    }
}

impl core::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{product code, warehouse, quantity}` entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_code: ProductCode,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

impl LineItem {
    pub fn new(product_code: ProductCode, warehouse_id: WarehouseId, quantity: i64) -> Self {
        Self {
            product_code,
            warehouse_id,
            quantity,
        }
    }
}

/// Batch-level rejection. `line` is the zero-based index of the first failing line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchRejection {
    #[error("request contains no line items")]
    Empty,

    #[error("line {line}: quantity must be positive (got {quantity})")]
    InvalidQuantity { line: usize, quantity: i64 },

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

    #[error("snapshot holds {actual} records for {expected} lines")]
    SnapshotMismatch { expected: usize, actual: usize },
}

impl BatchRejection {
    pub fn line(&self) -> Option<usize> {
        match self {
            BatchRejection::InvalidQuantity { line, .. }
            | BatchRejection::InsufficientStock { line, .. }
            | BatchRejection::OverRelease { line, .. } => Some(*line),
            BatchRejection::Empty | BatchRejection::SnapshotMismatch { .. } => None,
        }
    }

    fn at_line(line: usize, err: StockError) -> Self {
        match err {
            StockError::NonPositiveQuantity(quantity) => {
                BatchRejection::InvalidQuantity { line, quantity }
            }
            StockError::InsufficientStock {
                requested,
                reserved,
                quantity,
            } => BatchRejection::InsufficientStock {
                line,
                requested,
                reserved,
                quantity,
            },
            StockError::OverRelease {
                requested,
                reserved,
            } => BatchRejection::OverRelease {
                line,
                requested,
                reserved,
            },
            StockError::InvariantViolation { quantity, reserved } => {
                BatchRejection::InsufficientStock {
                    line,
                    requested: 0,
                    reserved,
                    quantity,
                }
            }
        }
    }
}

/// A structurally valid batch: at least one line, every quantity positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    kind: BatchKind,
    lines: Vec<LineItem>,
}

impl BatchRequest {
    pub fn new(kind: BatchKind, lines: Vec<LineItem>) -> Result<Self, BatchRejection> {
        if lines.is_empty() {
            return Err(BatchRejection::Empty);
        }
        if let Some((line, item)) = lines.iter().enumerate().find(|(_, l)| l.quantity <= 0) {
            return Err(BatchRejection::InvalidQuantity {
                line,
                quantity: item.quantity,
            });
        }
        Ok(Self { kind, lines })
    }

    pub fn reserve(lines: Vec<LineItem>) -> Result<Self, BatchRejection> {
        Self::new(BatchKind::Reserve, lines)
    }

    pub fn release(lines: Vec<LineItem>) -> Result<Self, BatchRejection> {
        Self::new(BatchKind::Release, lines)
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }
}

/// Write instruction for the ledger: set `new_reserved` on one record if it is
/// still at the version the plan was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMutation {
    pub record_id: StockRecordId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub expected_version: ExpectedVersion,
    pub new_reserved: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLine {
    pub line: usize,
    pub record_id: StockRecordId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub product_code: ProductCode,
    pub expected_version: u64,
    pub previous_reserved: i64,
    pub new_reserved: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPlan {
    pub kind: BatchKind,
    pub lines: Vec<PlannedLine>,
}

impl ReservationPlan {
    /// Ledger mutations in line order.
    pub fn mutations(&self) -> Vec<StockMutation> {
        self.lines
            .iter()
            .map(|l| StockMutation {
                record_id: l.record_id,
                warehouse_id: l.warehouse_id,
                product_id: l.product_id,
                expected_version: ExpectedVersion::Exact(l.expected_version),
                new_reserved: l.new_reserved,
            })
            .collect()
    }
}

/// Validate every line of `request` against `snapshot` (the record each line
/// resolved to, in line order). Fails on the first line that would break the
/// stock invariant; nothing is planned in that case.
pub fn plan_batch(
    request: &BatchRequest,
    snapshot: &[StockRecord],
) -> Result<ReservationPlan, BatchRejection> {
    if snapshot.len() != request.lines.len() {
        return Err(BatchRejection::SnapshotMismatch {
            expected: request.lines.len(),
            actual: snapshot.len(),
        });
    }

    let mut planned = Vec::with_capacity(snapshot.len());
    for (line, (item, record)) in request.lines.iter().zip(snapshot).enumerate() {
        let candidate = match request.kind {
            BatchKind::Reserve => record.reserve_candidate(item.quantity),
            BatchKind::Release => record.release_candidate(item.quantity),
        }
        .map_err(|e| BatchRejection::at_line(line, e))?;

        planned.push(PlannedLine {
            line,
            record_id: record.id(),
            warehouse_id: record.warehouse_id(),
            product_id: record.product_id(),
            product_code: record.product_code().clone(),
            expected_version: record.version(),
            previous_reserved: record.reserved_quantity(),
            new_reserved: candidate,
        });
    }

    Ok(ReservationPlan {
        kind: request.kind,
        lines: planned,
    })
}
