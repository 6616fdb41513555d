//! Tenant-isolated read model storage.
//!
//! Read models are disposable: they can always be rebuilt from the event log.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
