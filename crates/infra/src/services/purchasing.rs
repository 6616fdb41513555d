//! Purchase Order state machine service.
//!
//! Receiving (Approved → Received) is the only transition that moves stock:
//! one INBOUND per line into the purchase order's warehouse, committed with
//! the status change. A second receipt of a Received purchase order writes
//! nothing and returns the recorded outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use stockflow_core::{AggregateId, RequestContext, SupplierId, UserId, WarehouseId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{MovementType, StockPosting};
use stockflow_purchasing::{
    AddLine, ChangePurchaseOrderStatus, CreatePurchaseOrder, PurchaseLine, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderId, PurchaseOrderStatus, PurchaseTransitionEffect,
};

use crate::collaborators::{ProductCatalog, WarehouseDirectory};
use crate::error::ServiceError;
use crate::event_store::EventStore;
use crate::numbering::NumberGenerator;
use crate::pipeline::CommitPipeline;
use crate::services::movements::{MovementRequest, posting_of, stage_movement};
use crate::unit_of_work::{UnitOfWork, load_aggregate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<PurchaseLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderView {
    pub purchase_order_id: PurchaseOrderId,
    pub number: String,
    pub supplier_id: Option<SupplierId>,
    pub warehouse_id: Option<WarehouseId>,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<PurchaseLine>,
    pub total: u64,
    pub receipts: Vec<StockPosting>,
    pub created_by: Option<UserId>,
    pub created_on: Option<DateTime<Utc>>,
}

impl From<&PurchaseOrder> for PurchaseOrderView {
    fn from(po: &PurchaseOrder) -> Self {
        Self {
            purchase_order_id: po.id_typed(),
            number: po.number().to_string(),
            supplier_id: po.supplier_id(),
            warehouse_id: po.warehouse_id(),
            status: po.status(),
            lines: po.lines().to_vec(),
            total: po.total(),
            receipts: po.receipts().to_vec(),
            created_by: po.created_by(),
            created_on: po.created_on(),
        }
    }
}

pub struct PurchaseOrderService<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
    catalog: Arc<dyn ProductCatalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    numbers: Arc<dyn NumberGenerator>,
    number_prefix: String,
}

impl<S, B> PurchaseOrderService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        pipeline: Arc<CommitPipeline<S, B>>,
        catalog: Arc<dyn ProductCatalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
        numbers: Arc<dyn NumberGenerator>,
        number_prefix: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            catalog,
            warehouses,
            numbers,
            number_prefix: number_prefix.into(),
        }
    }

    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id(), supplier_id = %request.supplier_id),
        err
    )]
    pub fn create_purchase_order(
        &self,
        ctx: &RequestContext,
        request: NewPurchaseOrder,
    ) -> Result<PurchaseOrderView, ServiceError> {
        if self.warehouses.warehouse(ctx.tenant_id(), request.warehouse_id).is_none() {
            return Err(ServiceError::NotFound("warehouse".to_string()));
        }
        for line in &request.lines {
            self.ensure_product(ctx, line)?;
        }

        let number = self.numbers.next(ctx.tenant_id(), &self.number_prefix)?;
        let po_id = PurchaseOrderId::new(AggregateId::new());

        let mut uow = self.pipeline.begin(ctx.tenant_id());
        uow.execute(
            po_id.0,
            &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                tenant_id: ctx.tenant_id(),
                order_id: po_id,
                number,
                supplier_id: request.supplier_id,
                warehouse_id: request.warehouse_id,
                lines: request.lines,
                created_by: ctx.user_id(),
                occurred_at: Utc::now(),
            }),
            || PurchaseOrder::empty(po_id),
        )?;
        let view = PurchaseOrderView::from(uow.state(po_id.0, || PurchaseOrder::empty(po_id))?);
        self.pipeline.commit(uow)?;

        info!(purchase_order_id = %po_id, number = %view.number, "purchase order created");
        Ok(view)
    }

    /// Add a line to a Draft purchase order.
    #[instrument(
        skip(self, ctx, line),
        fields(tenant_id = %ctx.tenant_id(), purchase_order_id = %po_id),
        err
    )]
    pub fn add_line(
        &self,
        ctx: &RequestContext,
        po_id: PurchaseOrderId,
        line: PurchaseLine,
    ) -> Result<PurchaseOrderView, ServiceError> {
        self.ensure_product(ctx, &line)?;

        let mut uow = self.pipeline.begin(ctx.tenant_id());
        uow.execute(
            po_id.0,
            &PurchaseOrderCommand::AddLine(AddLine {
                tenant_id: ctx.tenant_id(),
                order_id: po_id,
                line,
                occurred_at: Utc::now(),
            }),
            || PurchaseOrder::empty(po_id),
        )?;
        let view = PurchaseOrderView::from(uow.state(po_id.0, || PurchaseOrder::empty(po_id))?);
        self.pipeline.commit(uow)?;
        Ok(view)
    }

    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), purchase_order_id = %po_id, to = %to),
        err
    )]
    pub fn change_status(
        &self,
        ctx: &RequestContext,
        po_id: PurchaseOrderId,
        to: PurchaseOrderStatus,
    ) -> Result<PurchaseOrderView, ServiceError> {
        let mut uow = self.pipeline.begin(ctx.tenant_id());
        let po = uow.state(po_id.0, || PurchaseOrder::empty(po_id))?.clone();
        if !po.exists() {
            return Err(ServiceError::NotFound("purchase order".to_string()));
        }

        let from = po.status();
        if from == PurchaseOrderStatus::Received && to == PurchaseOrderStatus::Received {
            debug!(idempotency_key = %po_id.receipt_key(), "purchase order already received");
            return Ok(PurchaseOrderView::from(&po));
        }

        let effect = from.transition_to(to)?;
        let receipts = match effect {
            PurchaseTransitionEffect::None => vec![],
            PurchaseTransitionEffect::ReceiveStock => self.stage_receipts(&mut uow, ctx, &po)?,
        };

        uow.execute(
            po_id.0,
            &PurchaseOrderCommand::ChangeStatus(ChangePurchaseOrderStatus {
                tenant_id: ctx.tenant_id(),
                order_id: po_id,
                to,
                receipts,
                changed_by: ctx.user_id(),
                occurred_at: Utc::now(),
            }),
            || PurchaseOrder::empty(po_id),
        )?;
        let view = PurchaseOrderView::from(uow.state(po_id.0, || PurchaseOrder::empty(po_id))?);
        self.pipeline.commit(uow)?;

        info!(
            number = %view.number,
            %from,
            %to,
            receipts = view.receipts.len(),
            "purchase order status changed"
        );
        Ok(view)
    }

    pub fn get_purchase_order(
        &self,
        ctx: &RequestContext,
        po_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderView, ServiceError> {
        let po = load_aggregate(self.pipeline.store(), ctx.tenant_id(), po_id.0, || {
            PurchaseOrder::empty(po_id)
        })?;
        if !po.exists() {
            return Err(ServiceError::NotFound("purchase order".to_string()));
        }
        Ok(PurchaseOrderView::from(&po))
    }

    fn stage_receipts(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        ctx: &RequestContext,
        po: &PurchaseOrder,
    ) -> Result<Vec<StockPosting>, ServiceError> {
        let warehouse_id = po
            .warehouse_id()
            .ok_or_else(|| {
                ServiceError::Validation("purchase order has no warehouse".to_string())
            })?;
        let now = Utc::now();

        po.lines()
            .iter()
            .map(|line| {
                let request = MovementRequest {
                    product_id: line.product_id,
                    warehouse_id,
                    movement_type: MovementType::Inbound,
                    quantity: line.quantity,
                    reference: po.number().to_string(),
                };
                stage_movement(uow, ctx, &request, now).map(|m| posting_of(&m))
            })
            .collect()
    }

    fn ensure_product(
        &self,
        ctx: &RequestContext,
        line: &PurchaseLine,
    ) -> Result<(), ServiceError> {
        if self.catalog.product(ctx.tenant_id(), line.product_id).is_none() {
            return Err(ServiceError::NotFound("product".to_string()));
        }
        Ok(())
    }
}
