use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde_json::Value as JsonValue;

use stockflow_core::{Aggregate, ProductId, TenantId, WarehouseId};
use stockflow_events::EventEnvelope;
use stockflow_inventory::{MovementType, StockItem, StockItemEvent, StockItemId};

use super::cursor::{ProjectionError, StreamCursors, decode};
use crate::read_model::TenantStore;

/// OUTBOUND units per UTC day for one stock location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyOutbound {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub days: BTreeMap<NaiveDate, i64>,
}

/// Shipped quantities bucketed by day, feeding observed consumption.
///
/// Each location keeps at most `retention_days` buckets, counted back from
/// its most recent shipment. A retention of zero records nothing.
#[derive(Debug)]
pub struct OutboundHistoryProjection<S>
where
    S: TenantStore<StockItemId, DailyOutbound>,
{
    store: S,
    cursors: StreamCursors,
    retention_days: u32,
}

impl<S> OutboundHistoryProjection<S>
where
    S: TenantStore<StockItemId, DailyOutbound>,
{
    pub fn new(store: S, retention_days: u32) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
            retention_days,
        }
    }

    pub fn get(&self, tenant_id: TenantId, item_id: &StockItemId) -> Option<DailyOutbound> {
        self.store.get(tenant_id, item_id)
    }

    /// Units shipped in the `window_days` UTC days ending on `as_of`, inclusive.
    ///
    /// Sales reversals come back as INBOUND and are not subtracted.
    pub fn shipped_in_window(
        &self,
        tenant_id: TenantId,
        item_id: &StockItemId,
        as_of: NaiveDate,
        window_days: u32,
    ) -> i64 {
        if window_days == 0 {
            return 0;
        }
        let Some(row) = self.store.get(tenant_id, item_id) else {
            return 0;
        };
        let first = days_before(as_of, window_days - 1);
        row.days
            .range(first..=as_of)
            .fold(0i64, |acc, (_, qty)| acc.saturating_add(*qty))
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != StockItem::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let StockItemEvent::MovementRecorded(e) = decode::<StockItemEvent>(envelope)?;
            if e.movement_type != MovementType::Outbound || self.retention_days == 0 {
                return Ok(());
            }

            let day = e.occurred_at.date_naive();
            self.store.update(envelope.tenant_id(), e.item_id, &mut |current| {
                let mut row = current.cloned().unwrap_or_else(|| DailyOutbound {
                    product_id: e.product_id,
                    warehouse_id: e.warehouse_id,
                    days: BTreeMap::new(),
                });
                let bucket = row.days.entry(day).or_insert(0);
                *bucket = bucket.saturating_add(e.quantity);

                if let Some(latest) = row.days.keys().next_back().copied() {
                    let horizon = days_before(latest, self.retention_days - 1);
                    row.days = row.days.split_off(&horizon);
                }
                Some(row)
            });
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

fn days_before(day: NaiveDate, days: u32) -> NaiveDate {
    day.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}
