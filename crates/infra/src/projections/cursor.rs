use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_core::{AggregateId, TenantId};
use stockflow_events::{Event, EventEnvelope};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Last applied sequence number per (tenant, stream).
///
/// Makes projections idempotent under at-least-once delivery: an envelope at
/// or below the cursor is a replay and is skipped; a gap is an error.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        let cursors = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        cursors
            .get(&CursorKey {
                tenant_id,
                aggregate_id,
            })
            .copied()
            .unwrap_or(0)
    }

    /// Run `apply` if the envelope is the next one of its stream, then advance.
    ///
    /// The cursor lock is held across `apply`, so concurrent deliveries of the
    /// same stream are serialized. A panic inside `apply` poisons the lock
    /// without advancing; the next delivery recovers it and retries the event.
    pub fn advance<F>(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        apply: F,
    ) -> Result<(), ProjectionError>
    where
        F: FnOnce() -> Result<(), ProjectionError>,
    {
        let key = CursorKey {
            tenant_id: envelope.tenant_id(),
            aggregate_id: envelope.aggregate_id(),
        };
        let seq = envelope.sequence_number();

        let mut cursors = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let last = cursors.get(&key).copied().unwrap_or(0);

        if seq <= last {
            // Duplicate or replay.
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(key, seq);
        Ok(())
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        let mut cursors = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        cursors.retain(|k, _| k.tenant_id != tenant_id);
    }
}

/// Decode an envelope payload and check it belongs to the envelope's tenant.
pub(crate) fn decode<E>(envelope: &EventEnvelope<JsonValue>) -> Result<E, ProjectionError>
where
    E: Event + serde::de::DeserializeOwned,
{
    let event: E = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
    if event.tenant_id() != envelope.tenant_id() {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            "test.stream".to_string(),
            seq,
            "test.happened".to_string(),
            Utc::now(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn replays_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let (tenant, stream) = (TenantId::new(), AggregateId::new());
        let mut applied = 0;

        for _ in 0..2 {
            cursors
                .advance(&envelope(tenant, stream, 1), || {
                    applied += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(applied, 1);

        let err = cursors.advance(&envelope(tenant, stream, 3), || Ok(())).unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
        assert_eq!(cursors.position(tenant, stream), 1);
    }

    #[test]
    fn failed_apply_does_not_advance() {
        let cursors = StreamCursors::new();
        let (tenant, stream) = (TenantId::new(), AggregateId::new());

        let _ = cursors.advance(&envelope(tenant, stream, 1), || {
            Err(ProjectionError::Deserialize("bad".into()))
        });
        assert_eq!(cursors.position(tenant, stream), 0);

        cursors.clear_tenant(tenant);
        assert_eq!(cursors.position(tenant, stream), 0);
    }

    #[test]
    fn panicking_apply_does_not_stall_the_stream() {
        let cursors = StreamCursors::new();
        let (tenant, stream) = (TenantId::new(), AggregateId::new());

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cursors.advance(&envelope(tenant, stream, 1), || panic!("projection bug"));
        }));
        assert!(panicked.is_err());
        assert_eq!(cursors.position(tenant, stream), 0);

        let mut applied = 0;
        cursors
            .advance(&envelope(tenant, stream, 1), || {
                applied += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(cursors.position(tenant, stream), 1);

        let err = cursors.advance(&envelope(tenant, stream, 3), || Ok(())).unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
    }
}
