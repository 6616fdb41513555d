use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, SupplierId, TenantId, UserId,
    WarehouseId,
};
use stockflow_events::Event;
use stockflow_inventory::StockPosting;

use crate::status::{PurchaseOrderStatus, PurchaseTransitionEffect};

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Idempotency key guarding the receipt of this purchase order.
    pub fn receipt_key(&self) -> String {
        format!("{}:RECEIVED", self.0)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl PurchaseLine {
    fn validate(&self) -> Result<(), DomainError> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }
        if self.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        Ok(())
    }

    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity as u64)
    }
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    number: String,
    supplier_id: Option<SupplierId>,
    warehouse_id: Option<WarehouseId>,
    status: PurchaseOrderStatus,
    lines: Vec<PurchaseLine>,
    receipts: Vec<StockPosting>,
    created_by: Option<UserId>,
    created_on: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            supplier_id: None,
            warehouse_id: None,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            receipts: Vec::new(),
            created_by: None,
            created_on: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[PurchaseLine] {
        &self.lines
    }

    /// Stock postings made when the purchase order was received.
    pub fn receipts(&self) -> &[StockPosting] {
        &self.receipts
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

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, PurchaseOrderStatus::Draft)
    }

    pub fn total(&self) -> u64 {
        self.lines.iter().map(PurchaseLine::line_total).sum()
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub number: String,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<PurchaseLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line: PurchaseLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePurchaseOrderStatus.
///
/// `receipts` must carry one INBOUND posting per line when moving to Received
/// and be empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePurchaseOrderStatus {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub to: PurchaseOrderStatus,
    pub receipts: Vec<StockPosting>,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLine(AddLine),
    ChangeStatus(ChangePurchaseOrderStatus),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub number: String,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<PurchaseLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line_no: u32,
    pub line: PurchaseLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderStatusChanged.
///
/// On receipt, `lines` and `receipts` carry the priced quantities that
/// projections (last purchase price, stock) translate into read-model rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderStatusChanged {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub number: String,
    pub from: PurchaseOrderStatus,
    pub to: PurchaseOrderStatus,
    pub effect: PurchaseTransitionEffect,
    pub lines: Vec<PurchaseLine>,
    pub receipts: Vec<StockPosting>,
    pub idempotency_key: Option<String>,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderStatusChanged(PurchaseOrderStatusChanged),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.order.line_added",
            PurchaseOrderEvent::PurchaseOrderStatusChanged(_) => "purchasing.order.status_changed",
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.tenant_id,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.tenant_id,
            PurchaseOrderEvent::PurchaseOrderStatusChanged(e) => e.tenant_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "purchasing.purchase_order";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = e.number.clone();
                self.supplier_id = Some(e.supplier_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.status = PurchaseOrderStatus::Draft;
                self.lines = e.lines.clone();
                self.receipts.clear();
                self.created_by = Some(e.created_by);
                self.created_on = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            PurchaseOrderEvent::PurchaseOrderStatusChanged(e) => {
                self.status = e.to;
                if e.effect == PurchaseTransitionEffect::ReceiveStock {
                    self.receipts = e.receipts.clone();
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("purchase order number is required"));
        }
        for line in &cmd.lines {
            line.validate()?;
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(PurchaseOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            number: cmd.number.trim().to_string(),
            supplier_id: cmd.supplier_id,
            warehouse_id: cmd.warehouse_id,
            lines: cmd.lines.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("purchase order"));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::validation(
                "lines can only be added to a draft purchase order",
            ));
        }
        cmd.line.validate()?;

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineAdded(PurchaseOrderLineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: next_line_no,
            line: cmd.line.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(
        &self,
        cmd: &ChangePurchaseOrderStatus,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("purchase order"));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        // A repeated receipt is answered with the outcome already on record.
        if self.status == PurchaseOrderStatus::Received && cmd.to == PurchaseOrderStatus::Received {
            return Ok(Vec::new());
        }

        let effect = self.status.transition_to(cmd.to)?;

        if cmd.to == PurchaseOrderStatus::Pending && self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }

        let idempotency_key = match effect {
            PurchaseTransitionEffect::None => {
                if !cmd.receipts.is_empty() {
                    return Err(DomainError::invariant("transition does not move stock"));
                }
                None
            }
            PurchaseTransitionEffect::ReceiveStock => {
                self.check_receipts(&cmd.receipts)?;
                Some(self.id.receipt_key())
            }
        };

        Ok(vec![PurchaseOrderEvent::PurchaseOrderStatusChanged(
            PurchaseOrderStatusChanged {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                number: self.number.clone(),
                from: self.status,
                to: cmd.to,
                effect,
                lines: self.lines.clone(),
                receipts: cmd.receipts.clone(),
                idempotency_key,
                changed_by: cmd.changed_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn check_receipts(&self, receipts: &[StockPosting]) -> Result<(), DomainError> {
        let warehouse_id = self
            .warehouse_id
            .ok_or_else(|| DomainError::invariant("warehouse must be set"))?;

        if receipts.len() != self.lines.len() {
            return Err(DomainError::invariant("one receipt per purchase line is required"));
        }
        for (line, receipt) in self.lines.iter().zip(receipts) {
            if receipt.product_id != line.product_id
                || receipt.quantity != line.quantity
                || receipt.warehouse_id != warehouse_id
            {
                return Err(DomainError::invariant("receipt does not match purchase line"));
            }
        }
        Ok(())
    }
}
