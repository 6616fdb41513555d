//! Read-model projections.
//!
//! Projections consume committed envelopes and maintain tenant-isolated read
//! models. All of them are:
//! - **Rebuildable** from the tenant's event log
//! - **Idempotent** per stream (see [`StreamCursors`])
//! - **Eventually consistent** relative to in-flight writers

pub mod cursor;
pub mod outbound_history;
pub mod purchase_prices;
pub mod stock_levels;

use serde_json::Value as JsonValue;

use stockflow_core::{ProductId, TenantId};
use stockflow_events::EventEnvelope;
use stockflow_inventory::StockItemId;

use crate::read_model::InMemoryTenantStore;

pub use cursor::{ProjectionError, StreamCursors};
pub use outbound_history::{DailyOutbound, OutboundHistoryProjection};
pub use purchase_prices::{LastPurchasePrice, PurchasePriceProjection};
pub use stock_levels::{StockLevel, StockLevelProjection};

pub type InMemoryStockLevels = StockLevelProjection<InMemoryTenantStore<StockItemId, StockLevel>>;
pub type InMemoryOutboundHistory =
    OutboundHistoryProjection<InMemoryTenantStore<StockItemId, DailyOutbound>>;
pub type InMemoryPurchasePrices =
    PurchasePriceProjection<InMemoryTenantStore<ProductId, LastPurchasePrice>>;

/// Every read model the services query, updated together.
#[derive(Debug)]
pub struct ReadModels {
    pub stock_levels: InMemoryStockLevels,
    pub outbound_history: InMemoryOutboundHistory,
    pub purchase_prices: InMemoryPurchasePrices,
}

impl ReadModels {
    /// `consumption_window_days` bounds how many days of shipments are kept.
    pub fn in_memory(consumption_window_days: u32) -> Self {
        Self {
            stock_levels: StockLevelProjection::new(InMemoryTenantStore::new()),
            outbound_history: OutboundHistoryProjection::new(
                InMemoryTenantStore::new(),
                consumption_window_days,
            ),
            purchase_prices: PurchasePriceProjection::new(InMemoryTenantStore::new()),
        }
    }

    /// Apply one envelope to every projection.
    ///
    /// Every projection is attempted; the first error is returned.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let results = [
            self.stock_levels.apply_envelope(envelope),
            self.outbound_history.apply_envelope(envelope),
            self.purchase_prices.apply_envelope(envelope),
        ];
        results.into_iter().collect()
    }

    /// Rebuild one tenant's read models from its envelopes (commit order).
    pub fn rebuild_tenant(
        &self,
        tenant_id: TenantId,
        envelopes: &[EventEnvelope<JsonValue>],
    ) -> Result<(), ProjectionError> {
        self.stock_levels.rebuild_tenant(tenant_id, envelopes)?;
        self.outbound_history.rebuild_tenant(tenant_id, envelopes)?;
        self.purchase_prices.rebuild_tenant(tenant_id, envelopes)?;
        Ok(())
    }
}
