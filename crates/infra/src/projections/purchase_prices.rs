use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use stockflow_core::{Aggregate, ProductId, TenantId};
use stockflow_events::EventEnvelope;
use stockflow_purchasing::{
    PurchaseOrder, PurchaseOrderEvent, PurchaseOrderId, PurchaseTransitionEffect,
};

use super::cursor::{ProjectionError, StreamCursors, decode};
use crate::read_model::TenantStore;

/// Unit price paid for a product on its most recent receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPurchasePrice {
    pub product_id: ProductId,
    pub unit_price: u64,
    pub purchase_order_id: PurchaseOrderId,
    pub received_at: DateTime<Utc>,
}

/// Latest received unit price per product, fed by purchase order receipts.
#[derive(Debug)]
pub struct PurchasePriceProjection<S>
where
    S: TenantStore<ProductId, LastPurchasePrice>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PurchasePriceProjection<S>
where
    S: TenantStore<ProductId, LastPurchasePrice>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn latest(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<LastPurchasePrice> {
        self.store.get(tenant_id, product_id)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PurchaseOrder::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let event = decode::<PurchaseOrderEvent>(envelope)?;

            let PurchaseOrderEvent::PurchaseOrderStatusChanged(e) = event else {
                return Ok(());
            };
            if e.effect != PurchaseTransitionEffect::ReceiveStock {
                return Ok(());
            }

            for line in &e.lines {
                let row = LastPurchasePrice {
                    product_id: line.product_id,
                    unit_price: line.unit_price,
                    purchase_order_id: e.order_id,
                    received_at: e.occurred_at,
                };
                // Older receipts replayed late never overwrite a newer price.
                self.store.update(envelope.tenant_id(), line.product_id, &mut |current| {
                    match current {
                        Some(existing) if existing.received_at > row.received_at => None,
                        _ => Some(row.clone()),
                    }
                });
            }
            Ok(())
        })
    }

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
