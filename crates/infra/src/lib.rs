//! Infrastructure layer: ledger storage, reservation engine, master data, config, DB.

pub mod config;
pub mod db;
pub mod ledger;
pub mod lookup;
pub mod master_data;
pub mod reservation;

#[cfg(test)]
mod integration_tests;

pub use ledger::{InventoryLedger, LedgerError, LedgerSession};
pub use lookup::LookupIndex;
pub use master_data::{DirectoryError, MasterDataDirectory};
pub use reservation::{BatchReceipt, EngineConfig, ReservationEngine, ReservationError};
