use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderLineId};
use domain::{
    Order, OrderItem, OrderLine, OrderProblem, OrderState, PendingCancel, StateThreshold,
    ThresholdKind,
};

use crate::Result;

/// A boolean escalation flag carried by order lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineFlag {
    Delayed,
    Problem,
}

impl LineFlag {
    /// Returns the flag's value on `line`.
    pub fn is_set(&self, line: &OrderLine) -> bool {
        match self {
            LineFlag::Delayed => line.delayed,
            LineFlag::Problem => line.problem,
        }
    }
}

/// Core trait for order persistence.
///
/// Every write that targets existing rows must affect at least one row;
/// an update matching nothing fails with `NoRowsAffected` rather than
/// succeeding silently. Updates to orders and lines are checked against the
/// caller's `version` and return the stored value with the bumped version.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order row.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Loads an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Updates an order's mutable columns.
    async fn update_order(&self, order: &Order) -> Result<Order>;

    /// Deletes an order together with its lines and items.
    async fn delete_order(&self, order_id: OrderId) -> Result<()>;

    /// Inserts items atomically.
    async fn insert_items(&self, items: &[OrderItem]) -> Result<()>;

    /// Updates the line assignment and state of each item atomically.
    async fn update_items(&self, items: &[OrderItem]) -> Result<()>;

    /// Items belonging to an order.
    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Items assigned to a line.
    async fn items_for_line(&self, line_id: OrderLineId) -> Result<Vec<OrderItem>>;

    /// Inserts lines atomically.
    async fn insert_lines(&self, lines: &[OrderLine]) -> Result<()>;

    /// Loads a line by id.
    async fn get_line(&self, line_id: OrderLineId) -> Result<Option<OrderLine>>;

    /// Lines belonging to an order, oldest first.
    async fn lines_for_order(&self, order_id: OrderId) -> Result<Vec<OrderLine>>;

    /// Updates a single line's mutable columns.
    async fn update_line(&self, line: &OrderLine) -> Result<OrderLine>;

    /// Updates an order and a set of its lines in one transaction.
    async fn update_order_and_lines(
        &self,
        order: &Order,
        lines: &[OrderLine],
    ) -> Result<(Order, Vec<OrderLine>)>;

    /// Lines in `state`, last updated before `updated_before`, with `flag` unset.
    async fn stale_lines(
        &self,
        state: OrderState,
        updated_before: DateTime<Utc>,
        flag: LineFlag,
    ) -> Result<Vec<OrderLine>>;

    /// Configured per-state thresholds of the given kind.
    async fn thresholds(&self, kind: ThresholdKind) -> Result<Vec<StateThreshold>>;

    /// Creates or replaces the threshold for one state.
    async fn set_threshold(&self, kind: ThresholdKind, threshold: StateThreshold) -> Result<()>;

    /// Records a problem and sets the line's `problem` flag in one transaction.
    ///
    /// Fails with `Duplicate` if the line already has a problem of that kind.
    async fn escalate_line(&self, problem: &OrderProblem, line: &OrderLine) -> Result<OrderLine>;

    /// Problems recorded for an order.
    async fn problems_for_order(&self, order_id: OrderId) -> Result<Vec<OrderProblem>>;

    /// Queues a line for confirm-cancel retries. Re-queuing keeps the
    /// attempt count.
    async fn add_pending_cancel(&self, pending: &PendingCancel) -> Result<()>;

    /// All queued pending cancels, oldest first.
    async fn pending_cancels(&self) -> Result<Vec<PendingCancel>>;

    /// Increments the attempt counter and returns the new value.
    async fn record_cancel_attempt(&self, line_id: OrderLineId) -> Result<u32>;

    /// Removes a line from the queue. Returns false if it was not queued.
    async fn remove_pending_cancel(&self, line_id: OrderLineId) -> Result<bool>;
}
