//! Application-level error model.
//!
//! Maps domain errors and event store errors into one enum the services
//! return, plus the message a caller may show to an end user.

use thiserror::Error;

use stockflow_core::DomainError;

use crate::event_store::EventStoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input or an illegal state transition.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Domain invariant failure (deterministic, indicates a bug or bad data).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Missing product, warehouse, order or purchase order (tenant-scoped).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: i64, requested: i64 },

    /// Domain-level conflict (e.g. creating an order twice).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency failure: another writer committed first.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// Cross-tenant access.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Failed to deserialize historical event payloads.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Rebuilding a read model from the event log failed.
    #[error("read model rebuild failed: {0}")]
    ReadModel(String),
}

impl ServiceError {
    /// Message safe to show to an end user.
    ///
    /// Input and stock errors keep their detail; infrastructure failures
    /// collapse into a generic message.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Validation(msg) => msg.clone(),
            ServiceError::NotFound(what) => format!("{what} not found"),
            ServiceError::InsufficientStock { available, requested } => format!(
                "insufficient stock: requested {requested}, only {available} available"
            ),
            ServiceError::Conflict(_) | ServiceError::Concurrency(_) => {
                "the record was modified concurrently; reload and try again".to_string()
            }
            ServiceError::InvariantViolation(_)
            | ServiceError::TenantIsolation(_)
            | ServiceError::Deserialize(_)
            | ServiceError::Store(_)
            | ServiceError::ReadModel(_) => "operation failed".to_string(),
        }
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, ServiceError::Concurrency(_))
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => ServiceError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => ServiceError::TenantIsolation(msg),
            other => ServiceError::Store(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ServiceError::Validation(msg),
            DomainError::InvariantViolation(msg) => ServiceError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::InsufficientStock { available, requested } => {
                ServiceError::InsufficientStock { available, requested }
            }
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
        }
    }
}
