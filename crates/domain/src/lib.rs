//! Domain model for multi-location order fulfillment.
//!
//! This crate provides:
//! - the Order aggregate (orders, per-location lines, items) and its state machine
//! - fulfillment locations
//! - delay/expiry thresholds and the escalation records they produce

pub mod escalation;
pub mod location;
pub mod order;

pub use escalation::{OrderProblem, PendingCancel, ProblemKind, StateThreshold, ThresholdKind};
pub use location::OrderLocation;
pub use order::{
    Address, CancelOrder, GridPoint, Money, NewOrderItem, Order, OrderDetails, OrderError,
    OrderItem, OrderLine, OrderState, PlaceOrder, ProductId, UpdateOrder,
};
