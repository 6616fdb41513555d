//! Catalog records the ledger and the replenishment engine read.
//!
//! Products and warehouses are owned by the surrounding system; these are
//! the read shapes it hands to the core.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{ProductId, WarehouseId};

/// Policy tag influencing the urgency of replenishment suggestions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Criticality {
    Low,
    #[default]
    Medium,
    High,
}

/// Reorder policy fields of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderPolicy {
    /// Inventory threshold at or below which replenishment should trigger.
    pub reorder_point: i64,
    /// Expected units consumed per day. Zero means "unknown".
    pub daily_consumption: Decimal,
    /// Days between placing and receiving a purchase order.
    pub lead_time_days: i64,
    pub criticality: Criticality,
    /// Price paid on the last purchase, in smallest currency unit.
    pub last_purchase_price: u64,
}

impl Default for ReorderPolicy {
    fn default() -> Self {
        Self {
            reorder_point: 0,
            daily_consumption: Decimal::ZERO,
            lead_time_days: 0,
            criticality: Criticality::default(),
            last_purchase_price: 0,
        }
    }
}

/// Product as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    /// Current list price in smallest currency unit (e.g., cents).
    pub price: u64,
    pub reorder_policy: ReorderPolicy,
}

impl ProductRecord {
    /// Case-insensitive substring match on name or SKU. A blank needle matches.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&needle) || self.sku.to_lowercase().contains(&needle)
    }
}

/// Warehouse as seen by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRecord {
    pub warehouse_id: WarehouseId,
    pub name: String,
    /// Fallback target for sales orders that do not name a warehouse.
    pub is_default: bool,
}
