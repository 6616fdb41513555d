//! Service wiring: one store, one bus, shared read models and collaborators.

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use stockflow_core::TenantId;
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_replenishment::ReplenishmentEngine;

use crate::collaborators::{InMemoryAuditLog, InMemoryCatalog, InMemoryNotifier};
use crate::config::StockflowConfig;
use crate::error::ServiceError;
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use crate::numbering::EventStoreNumberGenerator;
use crate::pipeline::CommitPipeline;
use crate::projections::ReadModels;
use crate::services::{
    MovementRecorder, OrderFulfillmentService, PurchaseOrderService,
    ReadModelReplenishmentRepository, ReplenishmentService,
};
use crate::side_effects::SideEffectRelay;
use crate::workers::{EventWorker, WorkerHandle};

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Every service over one commit pipeline.
pub struct StockflowServices {
    pub config: StockflowConfig,
    pub pipeline: Arc<CommitPipeline<SharedStore, SharedBus>>,
    pub bus: SharedBus,
    pub read_models: Arc<ReadModels>,
    pub catalog: Arc<InMemoryCatalog>,
    pub audit: Arc<InMemoryAuditLog>,
    pub notifier: Arc<InMemoryNotifier>,
    pub numbers: Arc<EventStoreNumberGenerator<SharedStore>>,
    pub movements: MovementRecorder<SharedStore, SharedBus>,
    pub orders: OrderFulfillmentService<SharedStore, SharedBus>,
    pub purchasing: PurchaseOrderService<SharedStore, SharedBus>,
    pub replenishment: ReplenishmentService,
}

impl StockflowServices {
    /// Everything in memory over a fresh store; for tests and local runs.
    pub fn in_memory(config: StockflowConfig) -> Self {
        Self::assemble(config, Arc::new(InMemoryEventStore::new()))
    }

    /// Services over an existing store.
    ///
    /// Read models are replayed from every tenant's event log before the
    /// services are handed out; document numbers continue from the counter
    /// streams already in the store.
    pub fn with_store(config: StockflowConfig, store: SharedStore) -> Result<Self, ServiceError> {
        let services = Self::assemble(config, store);

        let tenants = services.pipeline.store().tenants()?;
        let mut replayed = 0;
        for tenant_id in &tenants {
            replayed += services.rebuild_read_models(*tenant_id)?;
        }
        info!(tenants = tenants.len(), events = replayed, "read models restored from event store");

        Ok(services)
    }

    fn assemble(config: StockflowConfig, store: SharedStore) -> Self {
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let read_models = Arc::new(ReadModels::in_memory(
            config.replenishment.consumption_window_days,
        ));
        let numbers = Arc::new(EventStoreNumberGenerator::new(store.clone()));
        let pipeline = Arc::new(CommitPipeline::new(store, bus.clone(), read_models.clone()));

        let catalog = Arc::new(InMemoryCatalog::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let notifier = Arc::new(InMemoryNotifier::new());

        let movements = MovementRecorder::new(pipeline.clone(), catalog.clone(), catalog.clone());
        let orders = OrderFulfillmentService::new(
            pipeline.clone(),
            catalog.clone(),
            catalog.clone(),
            numbers.clone(),
            config.numbering.order_prefix.clone(),
        );
        let purchasing = PurchaseOrderService::new(
            pipeline.clone(),
            catalog.clone(),
            catalog.clone(),
            numbers.clone(),
            config.numbering.purchase_order_prefix.clone(),
        );

        let repository = Arc::new(ReadModelReplenishmentRepository::new(
            read_models.clone(),
            catalog.clone(),
            config.replenishment.consumption_window_days,
        ));
        let replenishment = ReplenishmentService::new(
            repository,
            ReplenishmentEngine::new(config.replenishment.policy()),
            config.replenishment.default_page_size,
            config.replenishment.max_page_size,
        );

        Self {
            config,
            pipeline,
            bus,
            read_models,
            catalog,
            audit,
            notifier,
            numbers,
            movements,
            orders,
            purchasing,
            replenishment,
        }
    }

    /// Replay a tenant's event log into fresh read models.
    pub fn rebuild_read_models(&self, tenant_id: TenantId) -> Result<usize, ServiceError> {
        self.pipeline.rebuild_read_models(tenant_id)
    }

    /// Start the audit/notification worker for all tenants.
    pub fn spawn_side_effect_worker(&self) -> io::Result<WorkerHandle> {
        let relay = Arc::new(SideEffectRelay::new(self.audit.clone(), self.notifier.clone()));
        EventWorker::spawn("side-effects", &*self.bus, None, relay.into_handler())
    }
}

/// Install the global tracing subscriber from `config.logging`.
pub fn init_logging(config: &StockflowConfig) {
    stockflow_observability::init_with(&config.logging);
}

/// Postgres when `database.url` is set, otherwise the in-memory store.
pub async fn connect_store(config: &StockflowConfig) -> Result<SharedStore, EventStoreError> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresEventStore::connect(url, config.database.max_connections).await?;
            store.ensure_schema().await?;
            info!(
                max_connections = config.database.max_connections,
                "using postgres event store"
            );
            Ok(Arc::new(store))
        }
        None => {
            info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
    }
}
