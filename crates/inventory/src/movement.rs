use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{ProductId, TenantId, UserId, WarehouseId};

use crate::stock_item::MovementRecorded;

/// Kind of stock-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Receipt: increments the balance, creating the stock item if absent.
    Inbound,
    /// Consumption: decrements the balance; never below zero.
    Outbound,
    /// Stock count: overwrites the balance with an absolute quantity.
    Adjust,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "INBOUND",
            MovementType::Outbound => "OUTBOUND",
            MovementType::Adjust => "ADJUST",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger row, as returned to callers.
///
/// `quantity` keeps the caller's meaning (amount moved, or the absolute target
/// for `Adjust`); `delta` is the signed contribution to the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub delta: i64,
    pub resulting_quantity: i64,
    pub reference: String,
    pub created_by: UserId,
    pub created_on: DateTime<Utc>,
}

/// One stock movement an order transition performed (or must undo).
///
/// Aggregates outside the ledger keep these to know exactly what they moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosting {
    pub movement_id: Uuid,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

impl StockPosting {
    /// Same location and amount, ignoring which movement carried it.
    pub fn same_line(&self, other: &StockPosting) -> bool {
        self.product_id == other.product_id
            && self.warehouse_id == other.warehouse_id
            && self.quantity == other.quantity
    }
}

impl From<&MovementRecorded> for Movement {
    fn from(e: &MovementRecorded) -> Self {
        Self {
            id: e.movement_id,
            tenant_id: e.tenant_id,
            movement_type: e.movement_type,
            product_id: e.product_id,
            warehouse_id: e.warehouse_id,
            quantity: e.quantity,
            delta: e.delta,
            resulting_quantity: e.resulting_quantity,
            reference: e.reference.clone(),
            created_by: e.created_by,
            created_on: e.occurred_at,
        }
    }
}
