use serde::{Deserialize, Serialize};

use warehousing_core::{DomainError, WarehouseId};

/// A physical warehouse. `available == false` blocks new reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub available: bool,
}

impl Warehouse {
    pub fn accepts_reservations(&self) -> bool {
        self.available
    }
}

/// Registration payload for a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub name: String,
    pub available: bool,
}

impl NewWarehouse {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        Ok(())
    }
}
