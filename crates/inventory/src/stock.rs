use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warehousing_core::{ProductId, StockRecordId, WarehouseId};

use crate::product::ProductCode;

/// Why a stock record refused a change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("quantity must be positive (got {0})")]
    NonPositiveQuantity(i64),

    #[error("insufficient stock: requested {requested}, reserved {reserved}, on hand {quantity}")]
    InsufficientStock {
        requested: i64,
        reserved: i64,
        quantity: i64,
    },

    #[error("cannot release {requested}: only {reserved} reserved")]
    OverRelease { requested: i64, reserved: i64 },

    #[error("reserved quantity {reserved} must lie within 0..={quantity}")]
    InvariantViolation { quantity: i64, reserved: i64 },
}

/// Raw column values of a stock record, as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockRecordParts {
    pub id: StockRecordId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub product_code: ProductCode,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry: on-hand and reserved quantity of one product in one warehouse.
///
/// Every constructor and transition checks `0 <= reserved_quantity <= quantity`,
/// so a `StockRecord` value that violates the invariant cannot exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StockRecordParts")]
pub struct StockRecord {
    id: StockRecordId,
    warehouse_id: WarehouseId,
    product_id: ProductId,
    product_code: ProductCode,
    quantity: i64,
    reserved_quantity: i64,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// A freshly stocked record: nothing reserved, version 1.
    pub fn stocked(
        id: StockRecordId,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        product_code: ProductCode,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<Self, StockError> {
        if quantity < 0 {
            return Err(StockError::InvariantViolation {
                quantity,
                reserved: 0,
            });
        }
        Ok(Self {
            id,
            warehouse_id,
            product_id,
            product_code,
            quantity,
            reserved_quantity: 0,
            version: 1,
            updated_at: at,
        })
    }

    /// Rehydrate a record from storage, re-checking the invariant.
    pub fn from_parts(parts: StockRecordParts) -> Result<Self, StockError> {
        check_bounds(parts.quantity, parts.reserved_quantity)?;
        Ok(Self {
            id: parts.id,
            warehouse_id: parts.warehouse_id,
            product_id: parts.product_id,
            product_code: parts.product_code,
            quantity: parts.quantity,
            reserved_quantity: parts.reserved_quantity,
            version: parts.version,
            updated_at: parts.updated_at,
        })
    }

    pub fn into_parts(self) -> StockRecordParts {
        StockRecordParts {
            id: self.id,
            warehouse_id: self.warehouse_id,
            product_id: self.product_id,
            product_code: self.product_code,
            quantity: self.quantity,
            reserved_quantity: self.reserved_quantity,
            version: self.version,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> StockRecordId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn product_code(&self) -> &ProductCode {
        &self.product_code
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    /// Stock that can still be reserved.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Reserved quantity after reserving `requested` more units.
    pub fn reserve_candidate(&self, requested: i64) -> Result<i64, StockError> {
        ensure_positive(requested)?;
        let insufficient = StockError::InsufficientStock {
            requested,
            reserved: self.reserved_quantity,
            quantity: self.quantity,
        };
        let candidate = self
            .reserved_quantity
            .checked_add(requested)
            .ok_or_else(|| insufficient.clone())?;
        if candidate > self.quantity {
            return Err(insufficient);
        }
        Ok(candidate)
    }

    /// Reserved quantity after releasing `requested` units.
    pub fn release_candidate(&self, requested: i64) -> Result<i64, StockError> {
        ensure_positive(requested)?;
        let candidate = self.reserved_quantity - requested;
        if candidate < 0 {
            return Err(StockError::OverRelease {
                requested,
                reserved: self.reserved_quantity,
            });
        }
        Ok(candidate)
    }

    /// The committed successor of this record with a new reserved quantity.
    pub fn with_reserved(&self, reserved_quantity: i64, at: DateTime<Utc>) -> Result<Self, StockError> {
        check_bounds(self.quantity, reserved_quantity)?;
        Ok(Self {
            reserved_quantity,
            version: self.version + 1,
            updated_at: at,
            ..self.clone()
        })
    }

    /// The committed successor after adding `delta` to the on-hand quantity.
    ///
    /// A negative `delta` writes stock off, but never below what is reserved.
    pub fn restocked(&self, delta: i64, at: DateTime<Utc>) -> Result<Self, StockError> {
        let quantity = self.quantity.checked_add(delta).ok_or(StockError::InvariantViolation {
            quantity: i64::MAX,
            reserved: self.reserved_quantity,
        })?;
        if quantity < self.reserved_quantity {
            return Err(StockError::InsufficientStock {
                requested: -delta,
                reserved: self.reserved_quantity,
                quantity: self.quantity,
            });
        }
        check_bounds(quantity, self.reserved_quantity)?;
        Ok(Self {
            quantity,
            version: self.version + 1,
            updated_at: at,
            ..self.clone()
        })
    }
}

fn ensure_positive(quantity: i64) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::NonPositiveQuantity(quantity));
    }
    Ok(())
}

fn check_bounds(quantity: i64, reserved: i64) -> Result<(), StockError> {
    if reserved < 0 || reserved > quantity {
        return Err(StockError::InvariantViolation { quantity, reserved });
    }
    Ok(())
}

impl TryFrom<StockRecordParts> for StockRecord {
    type Error = StockError;

    fn try_from(parts: StockRecordParts) -> Result<Self, Self::Error> {
        Self::from_parts(parts)
    }
}
