use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use stockflow_core::{ProductId, WarehouseId};
use stockflow_inventory::{Criticality, ReorderPolicy};

/// Tunables for candidate selection and the critical floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishmentPolicy {
    /// Stock items up to `reorder_point + slack_band` are candidates, so
    /// near-critical items surface before they become critical.
    pub slack_band: i64,
    /// Smallest suggestion for an item at or below its reorder point.
    pub min_critical_suggestion: i64,
}

impl Default for ReplenishmentPolicy {
    fn default() -> Self {
        Self { slack_band: 10, min_critical_suggestion: 1 }
    }
}

impl ReplenishmentPolicy {
    pub fn with_slack_band(mut self, slack_band: i64) -> Self {
        self.slack_band = slack_band.max(0);
        self
    }

    pub fn with_min_critical_suggestion(mut self, min: i64) -> Self {
        self.min_critical_suggestion = min.max(1);
        self
    }

    pub fn is_candidate(&self, current_stock: i64, reorder_point: i64) -> bool {
        current_stock <= reorder_point.saturating_add(self.slack_band)
    }
}

/// One stock item row as read at the data-access boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishmentCandidate {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub sku: String,
    pub name: String,
    pub current_stock: i64,
    pub reorder_policy: ReorderPolicy,
    /// Average OUTBOUND units per day over the observation window, if known.
    pub observed_daily_consumption: Option<Decimal>,
    /// Unit price on the latest received purchase order, if any.
    pub last_received_price: Option<u64>,
}

/// Suggestion for one stock item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishmentItem {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub sku: String,
    pub name: String,
    pub current_stock: i64,
    pub reorder_point: i64,
    /// Consumption rate the suggestion was computed with.
    pub daily_consumption: Decimal,
    pub lead_time_days: i64,
    pub criticality: Criticality,
    pub is_critical: bool,
    pub suggested_qty: i64,
    pub unit_price: u64,
    pub estimated_cost: u64,
}

/// `max(0, ceil(reorder_point + daily_consumption * lead_time_days - current_stock))`.
///
/// Saturates at `i64::MAX` instead of overflowing.
pub fn suggest_quantity(
    reorder_point: i64,
    daily_consumption: Decimal,
    lead_time_days: i64,
    current_stock: i64,
) -> i64 {
    let consumption = daily_consumption.max(Decimal::ZERO);
    let lead_time = Decimal::from(lead_time_days.max(0));

    let target = consumption
        .checked_mul(lead_time)
        .and_then(|c| c.checked_add(Decimal::from(reorder_point)))
        .and_then(|t| t.checked_sub(Decimal::from(current_stock)));

    match target {
        Some(gap) if gap <= Decimal::ZERO => 0,
        Some(gap) => gap.ceil().to_i64().unwrap_or(i64::MAX),
        None => i64::MAX,
    }
}

/// Deterministic suggestion computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplenishmentEngine {
    policy: ReplenishmentPolicy,
}

impl ReplenishmentEngine {
    pub fn new(policy: ReplenishmentPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReplenishmentPolicy {
        self.policy
    }

    /// Configured rate, or the observed one when the product has none.
    pub fn effective_consumption(&self, candidate: &ReplenishmentCandidate) -> Decimal {
        let configured = candidate.reorder_policy.daily_consumption;
        if configured > Decimal::ZERO {
            return configured;
        }
        candidate
            .observed_daily_consumption
            .filter(|d| *d > Decimal::ZERO)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn unit_price(&self, candidate: &ReplenishmentCandidate) -> u64 {
        candidate
            .last_received_price
            .filter(|p| *p > 0)
            .unwrap_or(candidate.reorder_policy.last_purchase_price)
    }

    pub fn evaluate(&self, candidate: &ReplenishmentCandidate) -> ReplenishmentItem {
        let policy = &candidate.reorder_policy;
        let daily_consumption = self.effective_consumption(candidate);
        let is_critical = candidate.current_stock <= policy.reorder_point;

        let mut suggested_qty = suggest_quantity(
            policy.reorder_point,
            daily_consumption,
            policy.lead_time_days,
            candidate.current_stock,
        );
        if is_critical {
            suggested_qty = suggested_qty.max(self.policy.min_critical_suggestion);
        }

        let unit_price = self.unit_price(candidate);
        let estimated_cost = (suggested_qty as u64).saturating_mul(unit_price);

        ReplenishmentItem {
            product_id: candidate.product_id,
            warehouse_id: candidate.warehouse_id,
            sku: candidate.sku.clone(),
            name: candidate.name.clone(),
            current_stock: candidate.current_stock,
            reorder_point: policy.reorder_point,
            daily_consumption,
            lead_time_days: policy.lead_time_days,
            criticality: policy.criticality,
            is_critical,
            suggested_qty,
            unit_price,
            estimated_cost,
        }
    }
}
