//! Stock ledger domain module (event-sourced).
//!
//! One `StockItem` stream per (tenant, product, warehouse). Every movement is
//! an immutable `MovementRecorded` event on that stream, so the balance is by
//! construction the sum of the movements. No IO, no storage.

pub mod catalog;
pub mod movement;
pub mod stock_item;

pub use catalog::{Criticality, ProductRecord, ReorderPolicy, WarehouseRecord};
pub use movement::{Movement, MovementType, StockPosting};
pub use stock_item::{
    MovementRecorded, RecordMovement, StockItem, StockItemCommand, StockItemEvent, StockItemId,
};
