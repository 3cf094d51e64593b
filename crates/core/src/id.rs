//! Strongly-typed identifiers used across the domain.
//!
//! Identities are database-assigned integers (`BIGSERIAL` in Postgres, a
//! counter in the in-memory backend). Wrapping them keeps a `WarehouseId`
//! from being passed where a `ProductId` is expected.

use serde::{Deserialize, Serialize};

/// Identifier of a warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(i64);

/// Identifier of a product (internal; reservation traffic uses `ProductCode`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

/// Identifier of a stock record (one per warehouse/product pair).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRecordId(i64);

macro_rules! impl_int_newtype {
    ($t:ty) => {
        impl $t {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_int_newtype!(WarehouseId);
impl_int_newtype!(ProductId);
impl_int_newtype!(StockRecordId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_the_raw_integer() {
        assert_eq!(WarehouseId::new(42).to_string(), "42");
        assert_eq!(i64::from(ProductId::from(7)), 7);
    }

    #[test]
    fn serializes_transparently() {
        assert_eq!(serde_json::to_string(&StockRecordId::new(9)).unwrap(), "9");
    }
}
