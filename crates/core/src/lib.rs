//! `stockflow-core`: ids, errors, aggregates and request context.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use context::RequestContext;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, ProductId, SupplierId, TenantId, UserId, WarehouseId};
