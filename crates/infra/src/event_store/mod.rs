//! Append-only event store boundary.
//!
//! Storage-agnostic abstraction for tenant-scoped event streams, with an
//! atomic multi-stream commit so one use case can touch several aggregates.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
