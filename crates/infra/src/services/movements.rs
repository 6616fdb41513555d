//! Movement Recorder: the only path that writes stock movements.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};
use uuid::Uuid;

use stockflow_core::{ProductId, RequestContext, WarehouseId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{
    Movement, MovementType, RecordMovement, StockItem, StockItemCommand, StockItemEvent,
    StockItemId, StockPosting,
};

use crate::collaborators::{ProductCatalog, WarehouseDirectory};
use crate::error::ServiceError;
use crate::event_store::EventStore;
use crate::pipeline::CommitPipeline;
use crate::unit_of_work::{UnitOfWork, load_aggregate, load_events};

/// Caller input for one movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    /// Amount moved; for `Adjust` the absolute target quantity.
    pub quantity: i64,
    #[serde(default)]
    pub reference: String,
}

/// Stage one movement on its stock item inside an open unit of work.
///
/// Used by the recorder and by the order/purchase-order transitions, so every
/// ledger write goes through the same `StockItem` decision.
pub(crate) fn stage_movement<S: EventStore + ?Sized>(
    uow: &mut UnitOfWork<'_, S>,
    ctx: &RequestContext,
    request: &MovementRequest,
    occurred_at: DateTime<Utc>,
) -> Result<Movement, ServiceError> {
    let item_id =
        StockItemId::for_location(ctx.tenant_id(), request.product_id, request.warehouse_id);
    let command = StockItemCommand::RecordMovement(RecordMovement {
        tenant_id: ctx.tenant_id(),
        item_id,
        product_id: request.product_id,
        warehouse_id: request.warehouse_id,
        movement_id: Uuid::now_v7(),
        movement_type: request.movement_type,
        quantity: request.quantity,
        reference: request.reference.clone(),
        created_by: ctx.user_id(),
        occurred_at,
    });

    let events = uow.execute(item_id.0, &command, || StockItem::empty(item_id))?;
    match events.first() {
        Some(StockItemEvent::MovementRecorded(e)) => Ok(Movement::from(e)),
        None => Err(ServiceError::InvariantViolation(
            "movement decided no event".to_string(),
        )),
    }
}

pub(crate) fn posting_of(movement: &Movement) -> StockPosting {
    StockPosting {
        movement_id: movement.id,
        product_id: movement.product_id,
        warehouse_id: movement.warehouse_id,
        quantity: movement.quantity,
    }
}

pub struct MovementRecorder<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
    catalog: Arc<dyn ProductCatalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
}

impl<S, B> MovementRecorder<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        pipeline: Arc<CommitPipeline<S, B>>,
        catalog: Arc<dyn ProductCatalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
    ) -> Self {
        Self {
            pipeline,
            catalog,
            warehouses,
        }
    }

    /// Record one movement and update the balance atomically.
    ///
    /// - INBOUND creates the stock item if absent, else increments
    /// - OUTBOUND fails with `InsufficientStock` when the balance is short
    /// - ADJUST overwrites the balance; the movement carries the delta
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id(),
            product_id = %request.product_id,
            warehouse_id = %request.warehouse_id,
            movement_type = %request.movement_type
        ),
        err
    )]
    pub fn record_movement(
        &self,
        ctx: &RequestContext,
        request: MovementRequest,
    ) -> Result<Movement, ServiceError> {
        self.ensure_location(ctx, request.product_id, request.warehouse_id)?;

        let mut uow = self.pipeline.begin(ctx.tenant_id());
        let movement = stage_movement(&mut uow, ctx, &request, Utc::now())?;
        self.pipeline.commit(uow)?;

        info!(
            movement_id = %movement.id,
            quantity = movement.quantity,
            resulting_quantity = movement.resulting_quantity,
            "movement recorded"
        );
        Ok(movement)
    }

    /// Current balance; zero for a pair that never had a movement.
    pub fn stock_level(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<i64, ServiceError> {
        let item_id = StockItemId::for_location(ctx.tenant_id(), product_id, warehouse_id);
        let item = load_aggregate(self.pipeline.store(), ctx.tenant_id(), item_id.0, || {
            StockItem::empty(item_id)
        })?;
        Ok(item.quantity())
    }

    /// Ledger history of one pair, oldest first.
    pub fn movements(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<Movement>, ServiceError> {
        let item_id = StockItemId::for_location(ctx.tenant_id(), product_id, warehouse_id);
        let events =
            load_events::<StockItem, _>(self.pipeline.store(), ctx.tenant_id(), item_id.0)?;
        Ok(events
            .iter()
            .map(|ev| match ev {
                StockItemEvent::MovementRecorded(e) => Movement::from(e),
            })
            .collect())
    }

    fn ensure_location(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<(), ServiceError> {
        if self.catalog.product(ctx.tenant_id(), product_id).is_none() {
            return Err(ServiceError::NotFound("product".to_string()));
        }
        if self.warehouses.warehouse(ctx.tenant_id(), warehouse_id).is_none() {
            return Err(ServiceError::NotFound("warehouse".to_string()));
        }
        Ok(())
    }
}
