//! Order fulfillment: the `Order` aggregate and its status graph.

pub mod order;
pub mod status;

pub use order::{
    ChangeOrderStatus, Order, OrderCommand, OrderEvent, OrderId, OrderItem, OrderPlaced,
    OrderStatusChanged, PlaceOrder, PricedLine,
};
pub use status::{OrderStatus, OrderTransitionEffect};
