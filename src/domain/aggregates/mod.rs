//! Aggregates module
pub mod order;

pub use order::{
    Address, Attention, CustomerSnapshot, LineItem, NewOrder, NotificationKind, Order, OrderError, OrderPatch,
    OrderStatus, PaymentMethod, ShipmentInfo, StatusDecision,
};
