use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ProductId, TenantId, UserId, WarehouseId,
};
use stockflow_events::Event;

use crate::movement::MovementType;

/// Stock item identifier: one per (tenant, product, warehouse).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub AggregateId);

impl StockItemId {
    /// The one stream id for a (tenant, product, warehouse) triple.
    pub fn for_location(
        tenant_id: TenantId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Self {
        Self(AggregateId::derived(
            StockItem::AGGREGATE_TYPE,
            &[tenant_id.as_uuid(), product_id.as_uuid(), warehouse_id.as_uuid()],
        ))
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: StockItem (the ledger balance for one product in one warehouse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    tenant_id: Option<TenantId>,
    product_id: Option<ProductId>,
    warehouse_id: Option<WarehouseId>,
    quantity: i64,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            tenant_id: None,
            product_id: None,
            warehouse_id: None,
            quantity: 0,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    /// On-hand quantity. Zero for a stock item that was never created.
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemCommand {
    RecordMovement(RecordMovement),
}

/// Event: MovementRecorded (one immutable ledger row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub movement_id: Uuid,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub delta: i64,
    pub resulting_quantity: i64,
    pub reference: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemEvent {
    MovementRecorded(MovementRecorded),
}

impl Event for StockItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockItemEvent::MovementRecorded(_) => "inventory.movement.recorded",
        }
    }

    fn tenant_id(&self) -> TenantId {
        match self {
            StockItemEvent::MovementRecorded(e) => e.tenant_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockItemEvent::MovementRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockItemCommand;
    type Event = StockItemEvent;
    type Error = DomainError;

    const AGGREGATE_TYPE: &'static str = "inventory.stock_item";

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockItemEvent::MovementRecorded(e) => {
                self.id = e.item_id;
                self.tenant_id = Some(e.tenant_id);
                self.product_id = Some(e.product_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.quantity += e.delta;
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockItemCommand::RecordMovement(cmd) => self.handle_record(cmd),
        }
    }
}

impl StockItem {
    fn ensure_location(&self, cmd: &RecordMovement) -> Result<(), DomainError> {
        let expected = StockItemId::for_location(cmd.tenant_id, cmd.product_id, cmd.warehouse_id);
        if cmd.item_id != expected || self.id != cmd.item_id {
            return Err(DomainError::invariant(
                "item_id does not match (tenant, product, warehouse)",
            ));
        }
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(cmd.tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.product_id != Some(cmd.product_id) || self.warehouse_id != Some(cmd.warehouse_id) {
            return Err(DomainError::invariant("stock item location mismatch"));
        }
        Ok(())
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<StockItemEvent>, DomainError> {
        self.ensure_location(cmd)?;

        let delta = match cmd.movement_type {
            MovementType::Inbound => {
                if cmd.quantity <= 0 {
                    return Err(DomainError::validation("quantity must be a positive integer"));
                }
                cmd.quantity
            }
            MovementType::Outbound => {
                if cmd.quantity <= 0 {
                    return Err(DomainError::validation("quantity must be a positive integer"));
                }
                if !self.created || self.quantity < cmd.quantity {
                    return Err(DomainError::insufficient_stock(self.quantity, cmd.quantity));
                }
                -cmd.quantity
            }
            MovementType::Adjust => {
                if cmd.quantity < 0 {
                    return Err(DomainError::validation("adjusted quantity cannot be negative"));
                }
                cmd.quantity - self.quantity
            }
        };

        let resulting_quantity = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("quantity overflow"))?;
        if resulting_quantity < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        Ok(vec![StockItemEvent::MovementRecorded(MovementRecorded {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            movement_id: cmd.movement_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            movement_type: cmd.movement_type,
            quantity: cmd.quantity,
            delta,
            resulting_quantity,
            reference: cmd.reference.trim().to_string(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
