//! Shared identifier types used across the order orchestration crates.

mod types;

pub use types::{CustomerId, LocationId, OrderId, OrderItemId, OrderLineId, ProblemId};
