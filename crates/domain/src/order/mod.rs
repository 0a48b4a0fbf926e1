//! Order aggregate and related types.

mod aggregate;
mod commands;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderItem, OrderLine};
pub use commands::{CancelOrder, NewOrderItem, OrderDetails, PlaceOrder, UpdateOrder};
pub use state::OrderState;
pub use value_objects::{Address, GridPoint, Money, ProductId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a state that allows the requested move.
    #[error("Invalid state transition: cannot move from {from} to {to}")]
    InvalidStateTransition { from: OrderState, to: OrderState },

    /// A stored state name did not match any known state.
    #[error("Unknown order state: {0}")]
    UnknownState(String),

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Customer email is required to send confirmations.
    #[error("Customer email is required")]
    CustomerEmailRequired,
}
