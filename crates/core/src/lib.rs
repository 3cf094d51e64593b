//! `warehousing-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::DomainError;
pub use id::{ProductId, StockRecordId, WarehouseId};
pub use version::ExpectedVersion;
