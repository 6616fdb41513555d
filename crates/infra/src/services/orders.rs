//! Order Fulfillment: order placement and the status state machine.
//!
//! A transition and the stock movements it implies commit together:
//!
//! | Transition          | Ledger effect                                   |
//! |---------------------|-------------------------------------------------|
//! | Pending → Paid      | one OUTBOUND per line (reference = order number) |
//! | Paid → Cancelled    | one INBOUND per recorded debit ("CANCEL-…")      |
//! | Pending → Cancelled | none                                            |
//! | Paid → Shipped      | none                                            |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use stockflow_core::{AggregateId, ProductId, RequestContext, UserId, WarehouseId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{MovementType, StockPosting};
use stockflow_sales::{
    ChangeOrderStatus, Order, OrderCommand, OrderId, OrderItem, OrderStatus,
    OrderTransitionEffect, PlaceOrder, PricedLine,
};

use crate::collaborators::{ProductCatalog, WarehouseDirectory};
use crate::error::ServiceError;
use crate::event_store::EventStore;
use crate::numbering::NumberGenerator;
use crate::pipeline::CommitPipeline;
use crate::services::movements::{MovementRequest, posting_of, stage_movement};
use crate::unit_of_work::{UnitOfWork, load_aggregate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_name: String,
    /// Warehouse to ship from; the tenant default is used when absent.
    pub warehouse_id: Option<WarehouseId>,
    pub lines: Vec<NewOrderLine>,
}

/// Order as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_name: String,
    pub status: OrderStatus,
    pub warehouse_id: Option<WarehouseId>,
    pub items: Vec<OrderItem>,
    pub total: u64,
    /// Stock debited at payment (empty unless Paid, Shipped or Cancelled after payment).
    pub debits: Vec<StockPosting>,
    pub created_by: Option<UserId>,
    pub created_on: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id_typed(),
            order_number: order.order_number().to_string(),
            customer_name: order.customer_name().to_string(),
            status: order.status(),
            warehouse_id: order.warehouse_id(),
            items: order.items().to_vec(),
            total: order.total(),
            debits: order.debits().to_vec(),
            created_by: order.created_by(),
            created_on: order.created_on(),
        }
    }
}

pub struct OrderFulfillmentService<S, B> {
    pipeline: Arc<CommitPipeline<S, B>>,
    catalog: Arc<dyn ProductCatalog>,
    warehouses: Arc<dyn WarehouseDirectory>,
    numbers: Arc<dyn NumberGenerator>,
    order_prefix: String,
}

impl<S, B> OrderFulfillmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        pipeline: Arc<CommitPipeline<S, B>>,
        catalog: Arc<dyn ProductCatalog>,
        warehouses: Arc<dyn WarehouseDirectory>,
        numbers: Arc<dyn NumberGenerator>,
        order_prefix: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            catalog,
            warehouses,
            numbers,
            order_prefix: order_prefix.into(),
        }
    }

    /// Place a Pending order with product name/price snapshots.
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id(), lines = request.lines.len()),
        err
    )]
    pub fn place_order(
        &self,
        ctx: &RequestContext,
        request: NewOrder,
    ) -> Result<OrderView, ServiceError> {
        if request.customer_name.trim().is_empty() {
            return Err(ServiceError::Validation("customer name is required".to_string()));
        }
        if request.lines.is_empty() {
            return Err(ServiceError::Validation("an order needs at least one line".to_string()));
        }
        if request.lines.iter().any(|l| l.quantity <= 0) {
            return Err(ServiceError::Validation("quantity must be a positive integer".to_string()));
        }
        if let Some(warehouse_id) = request.warehouse_id {
            if self.warehouses.warehouse(ctx.tenant_id(), warehouse_id).is_none() {
                return Err(ServiceError::NotFound("warehouse".to_string()));
            }
        }

        let lines = request
            .lines
            .iter()
            .map(|line| {
                let product = self
                    .catalog
                    .product(ctx.tenant_id(), line.product_id)
                    .ok_or_else(|| ServiceError::NotFound("product".to_string()))?;
                Ok(PricedLine {
                    product_id: product.product_id,
                    product_name: product.name,
                    price: product.price,
                    quantity: line.quantity,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let order_number = self.numbers.next(ctx.tenant_id(), &self.order_prefix)?;
        let order_id = OrderId::new(AggregateId::new());

        let mut uow = self.pipeline.begin(ctx.tenant_id());
        uow.execute(
            order_id.0,
            &OrderCommand::PlaceOrder(PlaceOrder {
                tenant_id: ctx.tenant_id(),
                order_id,
                order_number,
                customer_name: request.customer_name,
                warehouse_id: request.warehouse_id,
                lines,
                created_by: ctx.user_id(),
                occurred_at: Utc::now(),
            }),
            || Order::empty(order_id),
        )?;
        let view = OrderView::from(uow.state(order_id.0, || Order::empty(order_id))?);
        self.pipeline.commit(uow)?;

        info!(
            order_id = %order_id,
            order_number = %view.order_number,
            total = view.total,
            "order placed"
        );
        Ok(view)
    }

    /// Move an order along its state machine, with the stock effect of the
    /// transition in the same atomic commit.
    #[instrument(
        skip(self, ctx),
        fields(tenant_id = %ctx.tenant_id(), order_id = %order_id, to = %to),
        err
    )]
    pub fn change_status(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<OrderView, ServiceError> {
        let mut uow = self.pipeline.begin(ctx.tenant_id());
        let order = uow.state(order_id.0, || Order::empty(order_id))?.clone();
        if !order.exists() {
            return Err(ServiceError::NotFound("order".to_string()));
        }

        let from = order.status();
        let effect = from.transition_to(to)?;
        let postings = self.stage_stock_effect(&mut uow, ctx, &order, effect)?;
        let moved = postings.len();

        uow.execute(
            order_id.0,
            &OrderCommand::ChangeOrderStatus(ChangeOrderStatus {
                tenant_id: ctx.tenant_id(),
                order_id,
                to,
                postings,
                changed_by: ctx.user_id(),
                occurred_at: Utc::now(),
            }),
            || Order::empty(order_id),
        )?;
        let view = OrderView::from(uow.state(order_id.0, || Order::empty(order_id))?);
        self.pipeline.commit(uow)?;

        info!(
            order_number = %view.order_number,
            %from,
            %to,
            movements = moved,
            "order status changed"
        );
        Ok(view)
    }

    pub fn get_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<OrderView, ServiceError> {
        let order = load_aggregate(self.pipeline.store(), ctx.tenant_id(), order_id.0, || {
            Order::empty(order_id)
        })?;
        if !order.exists() {
            return Err(ServiceError::NotFound("order".to_string()));
        }
        Ok(OrderView::from(&order))
    }

    fn stage_stock_effect(
        &self,
        uow: &mut UnitOfWork<'_, S>,
        ctx: &RequestContext,
        order: &Order,
        effect: OrderTransitionEffect,
    ) -> Result<Vec<StockPosting>, ServiceError> {
        let reference = order.movement_reference(effect);
        let now = Utc::now();

        let requests: Vec<MovementRequest> = match effect {
            OrderTransitionEffect::None => return Ok(vec![]),
            OrderTransitionEffect::DebitStock => {
                let warehouse_id = self.resolve_warehouse(ctx, order)?;
                order
                    .items()
                    .iter()
                    .map(|item| MovementRequest {
                        product_id: item.product_id,
                        warehouse_id,
                        movement_type: MovementType::Outbound,
                        quantity: item.quantity,
                        reference: reference.clone(),
                    })
                    .collect()
            }
            OrderTransitionEffect::RestoreStock => order
                .debits()
                .iter()
                .map(|debit| MovementRequest {
                    product_id: debit.product_id,
                    warehouse_id: debit.warehouse_id,
                    movement_type: MovementType::Inbound,
                    quantity: debit.quantity,
                    reference: reference.clone(),
                })
                .collect(),
        };

        // Lines on the same stock item see each other's staged debits; the
        // first failure aborts the whole transition.
        requests
            .iter()
            .map(|request| stage_movement(uow, ctx, request, now).map(|m| posting_of(&m)))
            .collect()
    }

    fn resolve_warehouse(
        &self,
        ctx: &RequestContext,
        order: &Order,
    ) -> Result<WarehouseId, ServiceError> {
        if let Some(warehouse_id) = order.warehouse_id() {
            return Ok(warehouse_id);
        }
        self.warehouses
            .default_warehouse(ctx.tenant_id())
            .map(|w| w.warehouse_id)
            .ok_or_else(|| {
                ServiceError::Validation(
                    "no warehouse on the order and no default warehouse".to_string(),
                )
            })
    }
}
