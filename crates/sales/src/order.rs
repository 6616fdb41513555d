use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, TenantId, UserId, WarehouseId,
};
use stockflow_events::Event;
use stockflow_inventory::StockPosting;

use crate::status::{OrderStatus, OrderTransitionEffect};

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Catalog snapshot taken when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub product_name: String,
    /// Price in smallest currency unit (e.g., cents).
    pub price: u64,
    pub quantity: i64,
}

/// Order line. Immutable once the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub price: u64,
    pub quantity: i64,
    pub line_total: u64,
}

impl OrderItem {
    fn from_priced(line: &PricedLine) -> Result<Self, DomainError> {
        if line.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }
        let line_total = line
            .price
            .checked_mul(line.quantity as u64)
            .ok_or_else(|| DomainError::validation("line total overflow"))?;

        Ok(Self {
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            price: line.price,
            quantity: line.quantity,
            line_total,
        })
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    order_number: String,
    customer_name: String,
    status: OrderStatus,
    warehouse_id: Option<WarehouseId>,
    items: Vec<OrderItem>,
    debits: Vec<StockPosting>,
    created_by: Option<UserId>,
    created_on: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_number: String::new(),
            customer_name: String::new(),
            status: OrderStatus::Pending,
            warehouse_id: None,
            items: Vec::new(),
            debits: Vec::new(),
            created_by: None,
            created_on: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Stock postings made when the order was paid.
    pub fn debits(&self) -> &[StockPosting] {
        &self.debits
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_on(&self) -> Option<DateTime<Utc>> {
        self.created_on
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn total(&self) -> u64 {
        self.items.iter().map(|i| i.line_total).sum()
    }

    /// Reference written on the movements a transition produces.
    pub fn movement_reference(&self, effect: OrderTransitionEffect) -> String {
        match effect {
            OrderTransitionEffect::RestoreStock => format!("CANCEL-{}", self.order_number),
            OrderTransitionEffect::DebitStock | OrderTransitionEffect::None => {
                self.order_number.clone()
            }
        }
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_name: String,
    pub warehouse_id: Option<WarehouseId>,
    pub lines: Vec<PricedLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeOrderStatus.
///
/// `postings` are the stock movements the caller will commit together with
/// the status change. They must match what the transition requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOrderStatus {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub postings: Vec<StockPosting>,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ChangeOrderStatus(ChangeOrderStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_name: String,
    pub warehouse_id: Option<WarehouseId>,
    pub items: Vec<OrderItem>,
    pub total: u64,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub order_number: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub effect: OrderTransitionEffect,
    pub postings: Vec<StockPosting>,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderStatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "sales.order.placed",
            OrderEvent::OrderStatusChanged(_) => "sales.order.status_changed",
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            OrderEvent::OrderPlaced(e) => e.tenant_id,
            OrderEvent::OrderStatusChanged(e) => e.tenant_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "sales.order";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.order_number = e.order_number.clone();
                self.customer_name = e.customer_name.clone();
                self.status = OrderStatus::Pending;
                self.warehouse_id = e.warehouse_id;
                self.items = e.items.clone();
                self.debits.clear();
                self.created_by = Some(e.created_by);
                self.created_on = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                if e.effect == OrderTransitionEffect::DebitStock {
                    self.debits = e.postings.clone();
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeOrderStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        let customer_name = cmd.customer_name.trim();
        if customer_name.is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }
        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order number is required"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }

        let items = cmd
            .lines
            .iter()
            .map(OrderItem::from_priced)
            .collect::<Result<Vec<_>, _>>()?;
        let total = items
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.line_total))
            .ok_or_else(|| DomainError::validation("order total overflow"))?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            order_number: cmd.order_number.trim().to_string(),
            customer_name: customer_name.to_string(),
            warehouse_id: cmd.warehouse_id,
            items,
            total,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangeOrderStatus,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("order"));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        let effect = self.status.transition_to(cmd.to)?;
        self.check_postings(effect, &cmd.postings)?;

        Ok(vec![OrderEvent::OrderStatusChanged(OrderStatusChanged {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            order_number: self.order_number.clone(),
            from: self.status,
            to: cmd.to,
            effect,
            postings: cmd.postings.clone(),
            changed_by: cmd.changed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn check_postings(
        &self,
        effect: OrderTransitionEffect,
        postings: &[StockPosting],
    ) -> Result<(), DomainError> {
        match effect {
            OrderTransitionEffect::None => {
                if !postings.is_empty() {
                    return Err(DomainError::invariant("transition does not move stock"));
                }
            }
            OrderTransitionEffect::DebitStock => {
                if postings.len() != self.items.len() {
                    return Err(DomainError::invariant("one debit per order line is required"));
                }
                for (item, posting) in self.items.iter().zip(postings) {
                    if posting.product_id != item.product_id || posting.quantity != item.quantity {
                        return Err(DomainError::invariant("debit does not match order line"));
                    }
                    if self.warehouse_id.is_some_and(|w| w != posting.warehouse_id) {
                        return Err(DomainError::invariant("debit targets the wrong warehouse"));
                    }
                }
            }
            OrderTransitionEffect::RestoreStock => {
                if postings.len() != self.debits.len()
                    || !self.debits.iter().zip(postings).all(|(d, p)| d.same_line(p))
                {
                    return Err(DomainError::invariant(
                        "restore must mirror the debits recorded at payment",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    struct Fixture {
        tenant_id: TenantId,
        order_id: OrderId,
        warehouse_id: WarehouseId,
        user_id: UserId,
        products: Vec<ProductId>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tenant_id: TenantId::new(),
                order_id: OrderId::new(AggregateId::new()),
                warehouse_id: WarehouseId::new(),
                user_id: UserId::new(),
                products: vec![ProductId::new(), ProductId::new()],
            }
        }

        fn place(&self) -> OrderCommand {
            OrderCommand::PlaceOrder(PlaceOrder {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                order_number: "ORD-000001".to_string(),
                customer_name: "  Ada Lovelace ".to_string(),
                warehouse_id: Some(self.warehouse_id),
                lines: vec![
                    PricedLine {
                        product_id: self.products[0],
                        product_name: "Hex Bolt".to_string(),
                        price: 250,
                        quantity: 4,
                    },
                    PricedLine {
                        product_id: self.products[1],
                        product_name: "Washer".to_string(),
                        price: 10,
                        quantity: 10,
                    },
                ],
                created_by: self.user_id,
                occurred_at: test_time(),
            })
        }

        fn debit_postings(&self) -> Vec<StockPosting> {
            vec![
                StockPosting {
                    movement_id: Uuid::now_v7(),
                    product_id: self.products[0],
                    warehouse_id: self.warehouse_id,
                    quantity: 4,
                },
                StockPosting {
                    movement_id: Uuid::now_v7(),
                    product_id: self.products[1],
                    warehouse_id: self.warehouse_id,
                    quantity: 10,
                },
            ]
        }

        fn change(&self, to: OrderStatus, postings: Vec<StockPosting>) -> OrderCommand {
            OrderCommand::ChangeOrderStatus(ChangeOrderStatus {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                to,
                postings,
                changed_by: self.user_id,
                occurred_at: test_time(),
            })
        }
    }

    fn execute(order: &mut Order, cmd: &OrderCommand) -> Result<Vec<OrderEvent>, DomainError> {
        let events = order.handle(cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(events)
    }

    fn placed(fx: &Fixture) -> Order {
        let mut order = Order::empty(fx.order_id);
        execute(&mut order, &fx.place()).unwrap();
        order
    }

    #[test]
    fn place_order_snapshots_lines_and_starts_pending() {
        let fx = Fixture::new();
        let order = placed(&fx);

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.customer_name(), "Ada Lovelace");
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.items()[0].line_total, 1_000);
        assert_eq!(order.total(), 1_100);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn place_order_rejects_bad_input() {
        let fx = Fixture::new();
        let order = Order::empty(fx.order_id);

        let OrderCommand::PlaceOrder(base) = fx.place() else {
            panic!("Expected PlaceOrder command");
        };

        let mut blank_customer = base.clone();
        blank_customer.customer_name = "   ".to_string();
        let mut no_lines = base.clone();
        no_lines.lines.clear();
        let mut zero_qty = base.clone();
        zero_qty.lines[1].quantity = 0;

        for cmd in [blank_customer, no_lines, zero_qty] {
            let err = order.handle(&OrderCommand::PlaceOrder(cmd)).unwrap_err();
            assert!(err.is_validation(), "{err:?}");
        }
    }

    #[test]
    fn placing_twice_is_a_conflict() {
        let fx = Fixture::new();
        let order = placed(&fx);

        let err = order.handle(&fx.place()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn pay_records_debits_for_later_reversal() {
        let fx = Fixture::new();
        let mut order = placed(&fx);
        let debits = fx.debit_postings();

        execute(&mut order, &fx.change(OrderStatus::Paid, debits.clone())).unwrap();

        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.debits(), debits.as_slice());
        assert_eq!(order.movement_reference(OrderTransitionEffect::DebitStock), "ORD-000001");
        assert_eq!(
            order.movement_reference(OrderTransitionEffect::RestoreStock),
            "CANCEL-ORD-000001"
        );
    }

    #[test]
    fn pay_rejects_debits_that_do_not_match_lines() {
        let fx = Fixture::new();
        let order = placed(&fx);

        let mut short = fx.debit_postings();
        short.pop();
        let mut wrong_qty = fx.debit_postings();
        wrong_qty[0].quantity = 3;
        let mut wrong_warehouse = fx.debit_postings();
        wrong_warehouse[1].warehouse_id = WarehouseId::new();

        for postings in [short, wrong_qty, wrong_warehouse] {
            let err = order.handle(&fx.change(OrderStatus::Paid, postings)).unwrap_err();
            assert!(matches!(err, DomainError::InvariantViolation(_)));
        }
    }

    #[test]
    fn cancel_after_pay_must_mirror_debits() {
        let fx = Fixture::new();
        let mut order = placed(&fx);
        let debits = fx.debit_postings();
        execute(&mut order, &fx.change(OrderStatus::Paid, debits.clone())).unwrap();

        let err = order.handle(&fx.change(OrderStatus::Cancelled, vec![])).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let restores: Vec<StockPosting> = debits
            .iter()
            .map(|d| StockPosting { movement_id: Uuid::now_v7(), ..d.clone() })
            .collect();
        let events = execute(&mut order, &fx.change(OrderStatus::Cancelled, restores)).unwrap();

        match &events[0] {
            OrderEvent::OrderStatusChanged(e) => {
                assert_eq!(e.from, OrderStatus::Paid);
                assert_eq!(e.effect, OrderTransitionEffect::RestoreStock);
                assert_eq!(e.postings.len(), 2);
            }
            _ => panic!("Expected OrderStatusChanged event"),
        }
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn illegal_transitions_are_validation_errors() {
        let fx = Fixture::new();
        let mut order = placed(&fx);

        let err = order.handle(&fx.change(OrderStatus::Shipped, vec![])).unwrap_err();
        assert!(err.is_validation());

        execute(&mut order, &fx.change(OrderStatus::Cancelled, vec![])).unwrap();
        let err = order
            .handle(&fx.change(OrderStatus::Paid, fx.debit_postings()))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn status_change_on_missing_order_is_not_found() {
        let fx = Fixture::new();
        let order = Order::empty(fx.order_id);

        let err = order.handle(&fx.change(OrderStatus::Paid, vec![])).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn other_tenant_cannot_change_status() {
        let fx = Fixture::new();
        let order = placed(&fx);

        let OrderCommand::ChangeOrderStatus(mut cmd) = fx.change(OrderStatus::Cancelled, vec![])
        else {
            panic!("Expected ChangeOrderStatus command");
        };
        cmd.tenant_id = TenantId::new();

        let err = order.handle(&OrderCommand::ChangeOrderStatus(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let fx = Fixture::new();
        let order = placed(&fx);
        let before = order.clone();

        let cmd = fx.change(OrderStatus::Paid, fx.debit_postings());
        let first = order.handle(&cmd).unwrap();
        let second = order.handle(&cmd).unwrap();

        assert_eq!(order, before);
        assert_eq!(first, second);
    }

    #[test]
    fn apply_is_deterministic() {
        let fx = Fixture::new();
        let mut source = Order::empty(fx.order_id);
        let mut history = execute(&mut source, &fx.place()).unwrap();
        history.extend(
            execute(&mut source, &fx.change(OrderStatus::Paid, fx.debit_postings())).unwrap(),
        );
        history.extend(execute(&mut source, &fx.change(OrderStatus::Shipped, vec![])).unwrap());

        let mut replayed = Order::empty(fx.order_id);
        for e in &history {
            replayed.apply(e);
        }

        assert_eq!(replayed, source);
        assert_eq!(replayed.version(), 3);
        assert_eq!(replayed.status(), OrderStatus::Shipped);
    }
}
