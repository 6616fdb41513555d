use std::collections::HashMap;
use std::sync::RwLock;

use stockflow_core::{AggregateId, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, validate_commit};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Commit order across all streams.
    log: Vec<StoredEvent>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. A commit holds the single write lock for its
/// whole check-then-append, which makes multi-stream commits atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: Option<&Vec<StoredEvent>>) -> u64 {
        stream
            .and_then(|s| s.last())
            .map(|e| e.sequence_number)
            .unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Backend("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_commit(&appends)?;

        let mut guard = self.inner.write().map_err(|_| Self::poisoned())?;
        let inner = &mut *guard;

        // Phase 1: check every stream before mutating any.
        for append in &appends {
            let key = StreamKey {
                tenant_id: append.tenant_id,
                aggregate_id: append.aggregate_id,
            };
            let stream = inner.streams.get(&key);
            let current = Self::current_version(stream);

            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    append.aggregate_id, append.expected_version
                )));
            }

            if let Some(existing) = stream.and_then(|s| s.first()) {
                if existing.aggregate_type != append.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, append.aggregate_type
                    )));
                }
            }
        }

        // Phase 2: assign sequence numbers and append (append-only).
        let mut committed = Vec::new();
        for append in appends {
            if append.events.is_empty() {
                continue;
            }
            let key = StreamKey {
                tenant_id: append.tenant_id,
                aggregate_id: append.aggregate_id,
            };
            let stream = inner.streams.entry(key).or_default();
            let mut next = stream.last().map(|e| e.sequence_number).unwrap_or(0) + 1;

            let mut stored_batch = Vec::with_capacity(append.events.len());
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                stored_batch.push(stored);
            }

            inner.log.extend(stored_batch.iter().cloned());
            committed.extend(stored_batch);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.streams.get(&key).cloned().unwrap_or_default())
    }

    fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner
            .log
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn tenants(&self) -> Result<Vec<TenantId>, EventStoreError> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        let mut tenants: Vec<TenantId> = Vec::new();
        for e in &inner.log {
            if !tenants.contains(&e.tenant_id) {
                tenants.push(e.tenant_id);
            }
        }
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::Utc;
    use stockflow_core::ExpectedVersion;
    use uuid::Uuid;

    fn event(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({ "n": 1 }),
        }
    }

    fn append(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        expected: u64,
        count: usize,
    ) -> StreamAppend {
        StreamAppend {
            tenant_id,
            aggregate_id,
            aggregate_type: "test.stream".to_string(),
            expected_version: ExpectedVersion::Exact(expected),
            events: (0..count)
                .map(|_| event(tenant_id, aggregate_id, "test.stream"))
                .collect(),
        }
    }

    #[test]
    fn commit_assigns_per_stream_sequences() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());

        let committed = store
            .commit(vec![append(tenant, a, 0, 2), append(tenant, b, 0, 1)])
            .unwrap();
        let seqs: Vec<u64> = committed.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 1]);

        assert_eq!(store.load_stream(tenant, a).unwrap().len(), 2);
        assert_eq!(store.load_tenant(tenant).unwrap().len(), 3);
    }

    #[test]
    fn one_stale_stream_rejects_the_whole_commit() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        store.commit(vec![append(tenant, b, 0, 1)]).unwrap();

        let err = store
            .commit(vec![append(tenant, a, 0, 1), append(tenant, b, 0, 1)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        assert!(store.load_stream(tenant, a).unwrap().is_empty());
        assert_eq!(store.load_stream(tenant, b).unwrap().len(), 1);
    }

    #[test]
    fn empty_append_still_guards_its_version() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        store.commit(vec![append(tenant, b, 0, 1)]).unwrap();

        let err = store
            .commit(vec![append(tenant, a, 0, 1), append(tenant, b, 0, 0)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(tenant, a).unwrap().is_empty());
    }

    #[test]
    fn cross_tenant_commit_is_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .commit(vec![
                append(TenantId::new(), AggregateId::new(), 0, 1),
                append(TenantId::new(), AggregateId::new(), 0, 1),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[test]
    fn tenants_do_not_see_each_other() {
        let store = InMemoryEventStore::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        let id = AggregateId::new();
        store.commit(vec![append(t1, id, 0, 1)]).unwrap();

        assert!(store.load_stream(t2, id).unwrap().is_empty());
        assert!(store.load_tenant(t2).unwrap().is_empty());
    }

    #[test]
    fn tenants_are_listed_once_in_first_commit_order() {
        let store = InMemoryEventStore::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        assert!(store.tenants().unwrap().is_empty());

        store.commit(vec![append(t2, AggregateId::new(), 0, 2)]).unwrap();
        store.commit(vec![append(t1, AggregateId::new(), 0, 1)]).unwrap();
        store.commit(vec![append(t2, AggregateId::new(), 0, 1)]).unwrap();

        assert_eq!(store.tenants().unwrap(), vec![t2, t1]);
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let id = AggregateId::new();
        store.commit(vec![append(tenant, id, 0, 1)]).unwrap();

        let other = StreamAppend {
            tenant_id: tenant,
            aggregate_id: id,
            aggregate_type: "other.stream".to_string(),
            expected_version: ExpectedVersion::Exact(1),
            events: vec![event(tenant, id, "other.stream")],
        };
        let err = store.commit(vec![other]).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }
}
