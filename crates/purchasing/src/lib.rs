//! Purchasing domain module (Purchase Orders, event-sourced).
//!
//! Business rules only: no IO, no storage. Receiving a purchase order is the
//! one transition that moves stock.

pub mod order;
pub mod status;

pub use order::{
    AddLine, ChangePurchaseOrderStatus, CreatePurchaseOrder, PurchaseLine, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId,
    PurchaseOrderLineAdded, PurchaseOrderStatusChanged,
};
pub use status::{PurchaseOrderStatus, PurchaseTransitionEffect};
