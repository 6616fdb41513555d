//! Unit of work over one or more event-sourced aggregates.
//!
//! A use case (record a movement, pay an order, receive a purchase order)
//! loads every stream it touches into the unit of work, decides in memory,
//! and commits everything through a single `EventStore::commit`:
//!
//! ```text
//! load stream ─▶ rehydrate ─▶ handle(cmd) ─▶ apply to cached state ─▶ stage
//!      ▲                                                               │
//!      └────────────── same stream again: reuse cached state ◀─────────┘
//!
//! commit(): one StreamAppend per tracked stream, Exact(loaded_version)
//! ```
//!
//! Because state is cached per stream, two order lines hitting the same stock
//! item see each other's debits before anything is written. Streams that were
//! only read are still committed with an empty append, so their version is
//! guarded as well.

use std::any::Any;
use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use stockflow_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use stockflow_events::Event;

use crate::error::ServiceError;
use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

struct TrackedStream {
    aggregate_type: &'static str,
    loaded_version: u64,
    state: Box<dyn Any + Send>,
    pending: Vec<UncommittedEvent>,
}

/// Staged, not yet committed changes of one tenant across several streams.
pub struct UnitOfWork<'a, S: EventStore + ?Sized> {
    store: &'a S,
    tenant_id: TenantId,
    streams: HashMap<AggregateId, TrackedStream>,
    order: Vec<AggregateId>,
}

impl<'a, S: EventStore + ?Sized> UnitOfWork<'a, S> {
    pub fn new(store: &'a S, tenant_id: TenantId) -> Self {
        Self {
            store,
            tenant_id,
            streams: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Number of staged events across all streams.
    pub fn pending_events(&self) -> usize {
        self.streams.values().map(|s| s.pending.len()).sum()
    }

    /// Current (staged) state of an aggregate, loading it on first access.
    pub fn state<A>(
        &mut self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<&A, ServiceError>
    where
        A: Aggregate<Error = DomainError> + Send + 'static,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let tracked = self.track::<A>(aggregate_id, make_aggregate)?;
        downcast_ref::<A>(tracked)
    }

    /// Decide on a command against the staged state and stage the events.
    ///
    /// On a domain error nothing is staged for this command; earlier staged
    /// events stay, and the caller decides whether to drop the whole unit.
    pub fn execute<A>(
        &mut self,
        aggregate_id: AggregateId,
        command: &A::Command,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<Vec<A::Event>, ServiceError>
    where
        A: Aggregate<Error = DomainError> + Send + 'static,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        let tenant_id = self.tenant_id;
        let tracked = self.track::<A>(aggregate_id, make_aggregate)?;
        let TrackedStream { state, pending, .. } = tracked;
        let aggregate = state.downcast_mut::<A>().ok_or_else(|| type_mismatch(A::AGGREGATE_TYPE))?;

        let decided = aggregate.handle(command)?;

        let staged = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    A::AGGREGATE_TYPE,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        for ev in &decided {
            aggregate.apply(ev);
        }
        pending.extend(staged);

        Ok(decided)
    }

    /// Commit every tracked stream atomically.
    ///
    /// A unit of work that staged nothing writes nothing.
    pub fn commit(mut self) -> Result<Vec<StoredEvent>, ServiceError> {
        if self.pending_events() == 0 {
            return Ok(vec![]);
        }

        let mut appends = Vec::with_capacity(self.order.len());
        for aggregate_id in &self.order {
            let Some(tracked) = self.streams.remove(aggregate_id) else {
                continue;
            };
            appends.push(StreamAppend {
                tenant_id: self.tenant_id,
                aggregate_id: *aggregate_id,
                aggregate_type: tracked.aggregate_type.to_string(),
                expected_version: ExpectedVersion::Exact(tracked.loaded_version),
                events: tracked.pending,
            });
        }

        Ok(self.store.commit(appends)?)
    }

    fn track<A>(
        &mut self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<&mut TrackedStream, ServiceError>
    where
        A: Aggregate<Error = DomainError> + Send + 'static,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        if !self.streams.contains_key(&aggregate_id) {
            let (aggregate, loaded_version) =
                rehydrate(self.store, self.tenant_id, aggregate_id, make_aggregate)?;
            self.streams.insert(
                aggregate_id,
                TrackedStream {
                    aggregate_type: A::AGGREGATE_TYPE,
                    loaded_version,
                    state: Box::new(aggregate),
                    pending: Vec::new(),
                },
            );
            self.order.push(aggregate_id);
        }

        let tracked = self
            .streams
            .get_mut(&aggregate_id)
            .ok_or_else(|| {
                ServiceError::Store(EventStoreError::Backend("stream not tracked".to_string()))
            })?;
        if tracked.aggregate_type != A::AGGREGATE_TYPE {
            return Err(type_mismatch(A::AGGREGATE_TYPE));
        }
        Ok(tracked)
    }
}

impl<S: EventStore + ?Sized> core::fmt::Debug for UnitOfWork<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tenant_id", &self.tenant_id)
            .field("streams", &self.order)
            .field("pending_events", &self.pending_events())
            .finish()
    }
}

fn downcast_ref<A: 'static>(tracked: &TrackedStream) -> Result<&A, ServiceError> {
    tracked
        .state
        .downcast_ref::<A>()
        .ok_or_else(|| type_mismatch(tracked.aggregate_type))
}

fn type_mismatch(aggregate_type: &str) -> ServiceError {
    ServiceError::Store(EventStoreError::AggregateTypeMismatch(format!(
        "stream is not a '{aggregate_type}' stream"
    )))
}

/// Load and rehydrate one aggregate outside a unit of work (read paths).
pub fn load_aggregate<A, S>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    make_aggregate: impl FnOnce() -> A,
) -> Result<A, ServiceError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
    S: EventStore + ?Sized,
{
    rehydrate(store, tenant_id, aggregate_id, make_aggregate).map(|(aggregate, _)| aggregate)
}

/// Typed events of one stream in sequence order (history queries).
pub fn load_events<A, S>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<Vec<A::Event>, ServiceError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
    S: EventStore + ?Sized,
{
    let history = store.load_stream(tenant_id, aggregate_id)?;
    validate_loaded_stream(tenant_id, aggregate_id, A::AGGREGATE_TYPE, &history)?;
    history
        .into_iter()
        .map(|stored| {
            serde_json::from_value(stored.payload)
                .map_err(|e| ServiceError::Deserialize(e.to_string()))
        })
        .collect()
}

fn rehydrate<A, S>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    make_aggregate: impl FnOnce() -> A,
) -> Result<(A, u64), ServiceError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
    S: EventStore + ?Sized,
{
    let history = store.load_stream(tenant_id, aggregate_id)?;
    validate_loaded_stream(tenant_id, aggregate_id, A::AGGREGATE_TYPE, &history)?;

    let mut aggregate = make_aggregate();
    apply_history(&mut aggregate, &history)?;
    Ok((aggregate, stream_version(&history)))
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), ServiceError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(ServiceError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(ServiceError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.aggregate_type != aggregate_type {
            return Err(type_mismatch(aggregate_type));
        }
        if e.sequence_number <= last {
            return Err(ServiceError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), ServiceError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| ServiceError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockflow_core::{AggregateRoot, ProductId, UserId, WarehouseId};
    use stockflow_inventory::{
        MovementType, RecordMovement, StockItem, StockItemCommand, StockItemEvent, StockItemId,
    };

    use crate::event_store::InMemoryEventStore;

    #[derive(Clone, Copy)]
    struct Slot {
        tenant: TenantId,
        product: ProductId,
        warehouse: WarehouseId,
        item: StockItemId,
    }

    impl Slot {
        fn new() -> Self {
            let tenant = TenantId::new();
            let (product, warehouse) = (ProductId::new(), WarehouseId::new());
            Self {
                tenant,
                product,
                warehouse,
                item: StockItemId::for_location(tenant, product, warehouse),
            }
        }

        fn movement(&self, movement_type: MovementType, quantity: i64) -> StockItemCommand {
            StockItemCommand::RecordMovement(RecordMovement {
                tenant_id: self.tenant,
                item_id: self.item,
                product_id: self.product,
                warehouse_id: self.warehouse,
                movement_id: Uuid::now_v7(),
                movement_type,
                quantity,
                reference: String::new(),
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            })
        }

        fn stage(
            &self,
            uow: &mut UnitOfWork<'_, InMemoryEventStore>,
            movement_type: MovementType,
            quantity: i64,
        ) -> Result<Vec<StockItemEvent>, ServiceError> {
            let item = self.item;
            uow.execute(item.0, &self.movement(movement_type, quantity), || {
                StockItem::empty(item)
            })
        }
    }

    #[test]
    fn staged_debits_are_visible_to_later_commands() {
        let store = InMemoryEventStore::new();
        let slot = Slot::new();

        let mut uow = UnitOfWork::new(&store, slot.tenant);
        slot.stage(&mut uow, MovementType::Inbound, 10).unwrap();
        slot.stage(&mut uow, MovementType::Outbound, 6).unwrap();

        let err = slot.stage(&mut uow, MovementType::Outbound, 6).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock { available: 4, requested: 6 }));
        assert_eq!(uow.pending_events(), 2);

        let committed = uow.commit().unwrap();
        assert_eq!(committed.len(), 2);

        let item = slot.item;
        let reloaded: StockItem =
            load_aggregate(&store, slot.tenant, item.0, || StockItem::empty(item)).unwrap();
        assert_eq!(reloaded.quantity(), 4);
        assert_eq!(reloaded.version(), 2);
    }

    #[test]
    fn nothing_is_written_until_commit() {
        let store = InMemoryEventStore::new();
        let slot = Slot::new();

        let mut uow = UnitOfWork::new(&store, slot.tenant);
        slot.stage(&mut uow, MovementType::Inbound, 10).unwrap();
        drop(uow);

        assert!(store.load_stream(slot.tenant, slot.item.0).unwrap().is_empty());
    }

    #[test]
    fn stale_unit_of_work_loses_the_race() {
        let store = InMemoryEventStore::new();
        let slot = Slot::new();

        let mut first = UnitOfWork::new(&store, slot.tenant);
        let mut second = UnitOfWork::new(&store, slot.tenant);
        slot.stage(&mut first, MovementType::Inbound, 5).unwrap();
        slot.stage(&mut second, MovementType::Inbound, 7).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_concurrency());

        let events = load_events::<StockItem, _>(&store, slot.tenant, slot.item.0).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn empty_unit_of_work_commits_nothing() {
        let store = InMemoryEventStore::new();
        let slot = Slot::new();
        let item = slot.item;

        let mut uow = UnitOfWork::new(&store, slot.tenant);
        let state = uow.state(item.0, || StockItem::empty(item)).unwrap();
        assert!(!state.exists());
        assert!(uow.commit().unwrap().is_empty());
    }
}
