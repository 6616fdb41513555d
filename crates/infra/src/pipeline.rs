//! Commit pipeline shared by the services.
//!
//! ```text
//! UnitOfWork ─▶ EventStore::commit ─▶ read models ─▶ EventBus::publish ─▶ side-effect worker
//! ```
//!
//! The store is the source of truth. Read-model and bus failures happen after
//! the commit; they are logged and never reported as a failed operation.

use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use stockflow_core::TenantId;
use stockflow_events::{EventBus, EventEnvelope};

use crate::error::ServiceError;
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::ReadModels;
use crate::unit_of_work::UnitOfWork;

#[derive(Debug)]
pub struct CommitPipeline<S, B> {
    store: S,
    bus: B,
    read_models: Arc<ReadModels>,
    // Keeps read-model application and publication in commit order.
    publish_lock: Mutex<()>,
}

impl<S, B> CommitPipeline<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, read_models: Arc<ReadModels>) -> Self {
        Self {
            store,
            bus,
            read_models,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn read_models(&self) -> &ReadModels {
        &self.read_models
    }

    /// Start a unit of work for one tenant.
    pub fn begin(&self, tenant_id: TenantId) -> UnitOfWork<'_, S> {
        UnitOfWork::new(&self.store, tenant_id)
    }

    /// Commit atomically, then update read models and publish.
    pub fn commit(&self, uow: UnitOfWork<'_, S>) -> Result<Vec<StoredEvent>, ServiceError> {
        let _guard = self.publish_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let committed = uow.commit()?;
        for stored in &committed {
            self.deliver(stored.to_envelope());
        }
        Ok(committed)
    }

    fn deliver(&self, envelope: EventEnvelope<JsonValue>) {
        if let Err(err) = self.read_models.apply(&envelope) {
            warn!(
                tenant_id = %envelope.tenant_id(),
                event_type = envelope.event_type(),
                error = %err,
                "read model update failed; rebuild the tenant's read models"
            );
        }

        let event_id = envelope.event_id();
        if let Err(err) = self.bus.publish(envelope) {
            warn!(%event_id, error = ?err, "event publication failed");
        }
    }

    /// Rebuild a tenant's read models from its full event log.
    ///
    /// Returns the number of events replayed.
    pub fn rebuild_read_models(&self, tenant_id: TenantId) -> Result<usize, ServiceError> {
        let _guard = self.publish_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let envelopes: Vec<_> = self
            .store
            .load_tenant(tenant_id)?
            .iter()
            .map(StoredEvent::to_envelope)
            .collect();
        self.read_models
            .rebuild_tenant(tenant_id, &envelopes)
            .map_err(|e| ServiceError::ReadModel(e.to_string()))?;

        debug!(%tenant_id, events = envelopes.len(), "read models rebuilt");
        Ok(envelopes.len())
    }
}
