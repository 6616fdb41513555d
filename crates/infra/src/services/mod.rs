//! Application services: one transactional boundary per use case.

pub mod movements;
pub mod orders;
pub mod purchasing;
pub mod replenishment;

pub use movements::{MovementRecorder, MovementRequest};
pub use orders::{NewOrder, NewOrderLine, OrderFulfillmentService, OrderView};
pub use purchasing::{NewPurchaseOrder, PurchaseOrderService, PurchaseOrderView};
pub use replenishment::{
    ReadModelReplenishmentRepository, ReplenishmentRepository, ReplenishmentService,
};
