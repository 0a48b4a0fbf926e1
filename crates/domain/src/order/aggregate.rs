//! Order aggregate: the root row plus the lines and items it owns.

use chrono::{DateTime, Utc};
use common::{CustomerId, LocationId, OrderId, OrderItemId, OrderLineId};
use serde::{Deserialize, Serialize};

use super::{Address, Money, NewOrderItem, OrderDetails, OrderError, OrderState, ProductId};

/// Order aggregate root.
///
/// `version` is bumped by the store on every successful update and is
/// compared on write, so two actors racing on the same order cannot both
/// win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub customer_email: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub order_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub total_price: Money,
    pub total_quantity: u32,
    pub state: OrderState,
    pub delayed: bool,
    pub problem: bool,
    pub version: i64,
}

impl Order {
    /// Creates a new order in `Processing` with totals computed from `items`.
    pub fn new(
        customer_id: CustomerId,
        details: &OrderDetails,
        items: &[NewOrderItem],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            customer_id,
            customer_email: details.customer_email.clone(),
            shipping_address: details.shipping_address.clone(),
            billing_address: details.billing_address.clone(),
            order_date: now,
            last_update: now,
            total_price: items.iter().map(NewOrderItem::total_price).sum(),
            total_quantity: items.iter().map(|i| i.quantity).sum(),
            state: OrderState::Processing,
            delayed: false,
            problem: false,
            version: 0,
        }
    }

    /// Moves the order to `next`, rejecting illegal transitions.
    ///
    /// A real state change clears `delayed`: the delay applied to the old state.
    pub fn advance(&mut self, next: OrderState, now: DateTime<Utc>) -> Result<(), OrderError> {
        let next = self.state.transition_to(next)?;
        if next != self.state {
            self.delayed = false;
        }
        self.state = next;
        self.last_update = now;
        Ok(())
    }
}

/// The per-location grouping of an order's items; the unit of remote
/// commit and cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub location_id: LocationId,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub state: OrderState,
    pub delayed: bool,
    pub problem: bool,
    pub version: i64,
}

impl OrderLine {
    /// Creates a new line for `order_id` at `location_id`.
    pub fn new(order_id: OrderId, location_id: LocationId, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderLineId::new(),
            order_id,
            location_id,
            created_at: now,
            last_update: now,
            state: OrderState::Processing,
            delayed: false,
            problem: false,
            version: 0,
        }
    }

    /// Moves the line to `next`, rejecting illegal transitions.
    ///
    /// A real state change clears `delayed` so the delay scan can flag the
    /// line again against the new state's threshold.
    pub fn advance(&mut self, next: OrderState, now: DateTime<Utc>) -> Result<(), OrderError> {
        let next = self.state.transition_to(next)?;
        if next != self.state {
            self.delayed = false;
        }
        self.state = next;
        self.last_update = now;
        Ok(())
    }
}

/// A single product ordered, assigned to a line once its location is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub order_line_id: Option<OrderLineId>,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub state: OrderState,
}

impl OrderItem {
    /// Creates an unassigned item for `order_id`.
    pub fn new(order_id: OrderId, item: &NewOrderItem) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            order_line_id: None,
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            state: OrderState::Processing,
        }
    }

    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::GridPoint;

    fn details() -> OrderDetails {
        let address = Address::new("PT", "Lisbon", GridPoint::new(0, 0));
        OrderDetails::new("ana@example.com", address.clone(), address)
    }

    #[test]
    fn test_new_order_computes_totals() {
        let items = vec![
            NewOrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000)),
            NewOrderItem::new("SKU-002", "Gadget", 1, Money::from_cents(2500)),
        ];
        let order = Order::new(CustomerId::new(), &details(), &items, Utc::now());

        assert_eq!(order.state, OrderState::Processing);
        assert_eq!(order.total_price.cents(), 4500);
        assert_eq!(order.total_quantity, 3);
        assert_eq!(order.order_date, order.last_update);
        assert!(!order.delayed && !order.problem);
    }

    #[test]
    fn test_advance_updates_last_update() {
        let created = Utc::now() - chrono::Duration::hours(1);
        let mut line = OrderLine::new(OrderId::new(), LocationId::new(1), created);
        let now = Utc::now();

        line.advance(OrderState::Processed, now).unwrap();
        assert_eq!(line.state, OrderState::Processed);
        assert_eq!(line.last_update, now);
        assert_eq!(line.created_at, created);
    }

    #[test]
    fn test_state_change_clears_delayed() {
        let mut line = OrderLine::new(OrderId::new(), LocationId::new(1), Utc::now());
        line.advance(OrderState::Processed, Utc::now()).unwrap();
        line.delayed = true;

        line.advance(OrderState::Processed, Utc::now()).unwrap();
        assert!(line.delayed);

        line.advance(OrderState::Fulfilling, Utc::now()).unwrap();
        assert!(!line.delayed);
    }

    #[test]
    fn test_advance_rejects_illegal_transition() {
        let mut order = Order::new(CustomerId::new(), &details(), &[], Utc::now());
        order.state = OrderState::Delivered;
        let before = order.last_update;

        assert!(order.advance(OrderState::Cancelled, Utc::now()).is_err());
        assert_eq!(order.state, OrderState::Delivered);
        assert_eq!(order.last_update, before);
    }

    #[test]
    fn test_new_item_is_unassigned() {
        let order_id = OrderId::new();
        let item = OrderItem::new(
            order_id,
            &NewOrderItem::new("SKU-001", "Widget", 3, Money::from_cents(1000)),
        );
        assert_eq!(item.order_id, order_id);
        assert!(item.order_line_id.is_none());
        assert_eq!(item.total_price().cents(), 3000);
    }
}
