//! Order commands.

use common::{CustomerId, OrderId, OrderLineId};
use serde::{Deserialize, Serialize};

use super::{Address, Money, OrderError, OrderState, ProductId};

/// Customer-facing details captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub customer_email: String,
    pub shipping_address: Address,
    pub billing_address: Address,
}

impl OrderDetails {
    pub fn new(
        customer_email: impl Into<String>,
        shipping_address: Address,
        billing_address: Address,
    ) -> Self {
        Self {
            customer_email: customer_email.into(),
            shipping_address,
            billing_address,
        }
    }
}

/// An item requested at checkout, before it is assigned a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewOrderItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Command to place a new order across however many locations it needs.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub customer_id: CustomerId,
    pub details: OrderDetails,
    pub items: Vec<NewOrderItem>,
}

impl PlaceOrder {
    pub fn new(customer_id: CustomerId, details: OrderDetails, items: Vec<NewOrderItem>) -> Self {
        Self {
            customer_id,
            details,
            items,
        }
    }

    /// Checks the request before anything is written.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id.to_string(),
                quantity: item.quantity,
            });
        }
        if self.details.customer_email.trim().is_empty() {
            return Err(OrderError::CustomerEmailRequired);
        }
        Ok(())
    }
}

/// Command to cancel an order that has not started fulfillment.
#[derive(Debug, Clone, Copy)]
pub struct CancelOrder {
    pub order_id: OrderId,
}

impl CancelOrder {
    pub fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }
}

/// Command carrying a state change reported by a location for one line.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOrder {
    pub order_id: OrderId,
    pub order_line_id: OrderLineId,
    pub new_state: OrderState,
}

impl UpdateOrder {
    pub fn new(order_id: OrderId, order_line_id: OrderLineId, new_state: OrderState) -> Self {
        Self {
            order_id,
            order_line_id,
            new_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::GridPoint;

    fn details(email: &str) -> OrderDetails {
        let address = Address::new("PT", "Lisbon", GridPoint::new(0, 0));
        OrderDetails::new(email, address.clone(), address)
    }

    #[test]
    fn test_validate_accepts_well_formed_order() {
        let cmd = PlaceOrder::new(
            CustomerId::new(),
            details("ana@example.com"),
            vec![NewOrderItem::new("SKU-001", "Widget", 1, Money::from_cents(100))],
        );
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_order() {
        let cmd = PlaceOrder::new(CustomerId::new(), details("ana@example.com"), vec![]);
        assert!(matches!(cmd.validate(), Err(OrderError::NoItems)));
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let cmd = PlaceOrder::new(
            CustomerId::new(),
            details("ana@example.com"),
            vec![NewOrderItem::new("SKU-001", "Widget", 0, Money::from_cents(100))],
        );
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn test_validate_requires_email() {
        let cmd = PlaceOrder::new(
            CustomerId::new(),
            details("  "),
            vec![NewOrderItem::new("SKU-001", "Widget", 1, Money::from_cents(100))],
        );
        assert!(matches!(
            cmd.validate(),
            Err(OrderError::CustomerEmailRequired)
        ));
    }
}
