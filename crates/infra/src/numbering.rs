//! Human-readable document numbers ("ORD-000001", "PO-000042").
//!
//! Every (tenant, prefix) pair owns a counter stream in the event store. A
//! number is issued by appending to that stream at an exact expected version,
//! so services restarted over the same store, or several instances sharing
//! it, never hand out a number twice.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use stockflow_core::{AggregateId, ExpectedVersion, TenantId};
use stockflow_events::Event;

use crate::error::ServiceError;
use crate::event_store::{EventStore, EventStoreError, StreamAppend, UncommittedEvent};

/// Aggregate type of the counter streams.
pub const NUMBER_SEQUENCE_TYPE: &str = "number_sequence";

const MAX_ATTEMPTS: usize = 16;

/// Hands out numbers unique per (tenant, prefix).
pub trait NumberGenerator: Send + Sync {
    fn next(&self, tenant_id: TenantId, prefix: &str) -> Result<String, ServiceError>;
}

impl<G: NumberGenerator + ?Sized> NumberGenerator for std::sync::Arc<G> {
    fn next(&self, tenant_id: TenantId, prefix: &str) -> Result<String, ServiceError> {
        (**self).next(tenant_id, prefix)
    }
}

/// One issued number; the stream sequence number equals `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberIssued {
    pub tenant_id: TenantId,
    pub prefix: String,
    pub value: u64,
    pub occurred_at: DateTime<Utc>,
}

impl Event for NumberIssued {
    fn event_type(&self) -> &'static str {
        "numbering.sequence.issued"
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Counter stream id of a (tenant, prefix) pair.
pub fn sequence_stream_id(tenant_id: TenantId, prefix: &str) -> AggregateId {
    let prefix_key = Uuid::new_v5(&Uuid::NAMESPACE_OID, prefix.as_bytes());
    AggregateId::derived(NUMBER_SEQUENCE_TYPE, &[tenant_id.as_uuid(), &prefix_key])
}

/// Number generator backed by counter streams in the event store.
///
/// Numbers are never reused, but a failed use case leaves a gap.
#[derive(Debug)]
pub struct EventStoreNumberGenerator<S> {
    store: S,
    // Last version seen per counter stream. A stale entry costs one retry.
    known: Mutex<HashMap<AggregateId, u64>>,
}

impl<S: EventStore> EventStoreNumberGenerator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            known: Mutex::new(HashMap::new()),
        }
    }

    fn cached_version(&self, stream_id: AggregateId) -> Option<u64> {
        let known = self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        known.get(&stream_id).copied()
    }

    fn remember(&self, stream_id: AggregateId, version: u64) {
        let mut known = self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        known.insert(stream_id, version);
    }

    fn stored_version(
        &self,
        tenant_id: TenantId,
        stream_id: AggregateId,
    ) -> Result<u64, EventStoreError> {
        Ok(self
            .store
            .load_stream(tenant_id, stream_id)?
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or(0))
    }

    fn issue(
        &self,
        tenant_id: TenantId,
        stream_id: AggregateId,
        prefix: &str,
        version: u64,
    ) -> Result<u64, EventStoreError> {
        let value = version + 1;
        let event = NumberIssued {
            tenant_id,
            prefix: prefix.to_string(),
            value,
            occurred_at: Utc::now(),
        };
        let append = StreamAppend {
            tenant_id,
            aggregate_id: stream_id,
            aggregate_type: NUMBER_SEQUENCE_TYPE.to_string(),
            expected_version: ExpectedVersion::Exact(version),
            events: vec![UncommittedEvent::from_typed(
                tenant_id,
                stream_id,
                NUMBER_SEQUENCE_TYPE,
                Uuid::now_v7(),
                &event,
            )?],
        };
        self.store.commit(vec![append])?;
        Ok(value)
    }
}

impl<S: EventStore> NumberGenerator for EventStoreNumberGenerator<S> {
    fn next(&self, tenant_id: TenantId, prefix: &str) -> Result<String, ServiceError> {
        let stream_id = sequence_stream_id(tenant_id, prefix);
        let mut version = match self.cached_version(stream_id) {
            Some(version) => version,
            None => self.stored_version(tenant_id, stream_id)?,
        };

        for _ in 0..MAX_ATTEMPTS {
            match self.issue(tenant_id, stream_id, prefix, version) {
                Ok(value) => {
                    self.remember(stream_id, value);
                    return Ok(format!("{prefix}{value:06}"));
                }
                Err(EventStoreError::Concurrency(_)) => {
                    debug!(%tenant_id, prefix, "number sequence advanced elsewhere; reloading");
                    version = self.stored_version(tenant_id, stream_id)?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ServiceError::Concurrency(format!(
            "could not issue a {prefix} number after {MAX_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    #[test]
    fn numbers_are_sequential_per_tenant_and_prefix() {
        let numbers = EventStoreNumberGenerator::new(InMemoryEventStore::new());
        let (a, b) = (TenantId::new(), TenantId::new());

        assert_eq!(numbers.next(a, "ORD-").unwrap(), "ORD-000001");
        assert_eq!(numbers.next(a, "ORD-").unwrap(), "ORD-000002");
        assert_eq!(numbers.next(a, "PO-").unwrap(), "PO-000001");
        assert_eq!(numbers.next(b, "ORD-").unwrap(), "ORD-000001");
    }

    #[test]
    fn generators_sharing_a_store_never_repeat() {
        let store = Arc::new(InMemoryEventStore::new());
        let first = EventStoreNumberGenerator::new(store.clone());
        let second = EventStoreNumberGenerator::new(store.clone());
        let tenant = TenantId::new();

        assert_eq!(first.next(tenant, "ORD-").unwrap(), "ORD-000001");
        assert_eq!(second.next(tenant, "ORD-").unwrap(), "ORD-000002");
        // `first` still caches version 1 and has to reload.
        assert_eq!(first.next(tenant, "ORD-").unwrap(), "ORD-000003");

        let restarted = EventStoreNumberGenerator::new(store.clone());
        assert_eq!(restarted.next(tenant, "ORD-").unwrap(), "ORD-000004");

        let stream = store.load_stream(tenant, sequence_stream_id(tenant, "ORD-")).unwrap();
        assert_eq!(stream.len(), 4);
        assert!(stream.iter().all(|e| e.aggregate_type == NUMBER_SEQUENCE_TYPE));
    }

    #[test]
    fn concurrent_callers_get_distinct_numbers() {
        let store = Arc::new(InMemoryEventStore::new());
        let generators: Vec<_> = (0..4)
            .map(|_| EventStoreNumberGenerator::new(store.clone()))
            .collect();
        let tenant = TenantId::new();

        let mut issued: Vec<String> = std::thread::scope(|scope| {
            let workers: Vec<_> = generators
                .iter()
                .map(|g| {
                    scope.spawn(move || {
                        (0..3)
                            .map(|_| g.next(tenant, "PO-").unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });
        issued.sort();
        issued.dedup();

        assert_eq!(issued.len(), 12);
        assert_eq!(issued.last().map(String::as_str), Some("PO-000012"));
    }
}
