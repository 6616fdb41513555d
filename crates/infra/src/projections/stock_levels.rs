use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use stockflow_core::{Aggregate, ProductId, TenantId, WarehouseId};
use stockflow_events::EventEnvelope;
use stockflow_inventory::{StockItem, StockItemEvent, StockItemId};

use super::cursor::{ProjectionError, StreamCursors, decode};
use crate::read_model::TenantStore;

/// Queryable stock balance of one (product, warehouse) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Current stock per stock item, fed by `inventory.movement.recorded`.
#[derive(Debug)]
pub struct StockLevelProjection<S>
where
    S: TenantStore<StockItemId, StockLevel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLevelProjection<S>
where
    S: TenantStore<StockItemId, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, item_id: &StockItemId) -> Option<StockLevel> {
        self.store.get(tenant_id, item_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        self.store.list(tenant_id)
    }

    /// Apply a published envelope. Envelopes of other streams are ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != StockItem::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let StockItemEvent::MovementRecorded(e) = decode::<StockItemEvent>(envelope)?;

            if e.item_id.0 != envelope.aggregate_id() {
                return Err(ProjectionError::TenantIsolation(
                    "event item_id does not match envelope aggregate_id".to_string(),
                ));
            }

            // The event carries the resulting balance, so replays converge.
            self.store.upsert(
                envelope.tenant_id(),
                e.item_id,
                StockLevel {
                    item_id: e.item_id,
                    product_id: e.product_id,
                    warehouse_id: e.warehouse_id,
                    quantity: e.resulting_quantity,
                    updated_at: e.occurred_at,
                },
            );
            Ok(())
        })
    }

    /// Drop the tenant's rows and replay its envelopes in commit order.
    pub fn rebuild_tenant<'e>(
        &self,
        tenant_id: TenantId,
        envelopes: impl IntoIterator<Item = &'e EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
        for env in envelopes {
            if env.tenant_id() == tenant_id {
                self.apply_envelope(env)?;
            }
        }
        Ok(())
    }
}
