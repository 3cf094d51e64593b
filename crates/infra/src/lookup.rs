//! Resolution of `(warehouse, product code)` references to stock records.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use warehousing_core::WarehouseId;
use warehousing_inventory::{LineItem, ProductCode, StockRecord};

use crate::ledger::{LedgerError, LedgerSession, StockKey};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("line {line}: product '{product_code}' is not stocked in warehouse {warehouse_id}")]
    ProductNotInWarehouse {
        line: usize,
        warehouse_id: WarehouseId,
        product_code: ProductCode,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Resolves line items inside the caller's ledger session, so the records it
/// returns are the same snapshot the caller validates and writes against.
///
/// Distinct keys are read once each, in ascending key order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LookupIndex;

impl LookupIndex {
    pub fn new() -> Self {
        Self
    }

    /// Returns one record per line, in line order. The first line (by index)
    /// without a record fails the whole resolution.
    pub async fn resolve(
        &self,
        session: &mut LedgerSession,
        lines: &[LineItem],
    ) -> Result<Vec<StockRecord>, LookupError> {
        let mut found: BTreeMap<StockKey, Option<StockRecord>> = lines
            .iter()
            .map(|l| (StockKey::new(l.warehouse_id, l.product_code.clone()), None))
            .collect();

        for (key, slot) in found.iter_mut() {
            *slot = session.find(key).await?;
        }
        debug!(lines = lines.len(), keys = found.len(), "resolved stock keys");

        lines
            .iter()
            .enumerate()
            .map(|(line, item)| {
                let key = StockKey::new(item.warehouse_id, item.product_code.clone());
                found
                    .get(&key)
                    .cloned()
                    .flatten()
                    .ok_or_else(|| LookupError::ProductNotInWarehouse {
                        line,
                        warehouse_id: item.warehouse_id,
                        product_code: item.product_code.clone(),
                    })
            })
            .collect()
    }
}
