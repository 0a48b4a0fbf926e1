//! Order and line state updates reported by locations.

use chrono::Utc;
use domain::{Order, OrderItem, OrderLine, OrderState, UpdateOrder};
use order_store::OrderStore;

use crate::error::{Result, SagaError};
use crate::services::{BillingService, Notifier};

/// Customer email sent when a single line moves on ahead of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineHandler {
    pub subject: &'static str,
    pub summary: &'static str,
}

const LINE_HANDLERS: [(OrderState, LineHandler); 5] = [
    (
        OrderState::Processed,
        LineHandler {
            subject: "Part of your order is confirmed",
            summary: "has been confirmed by the warehouse",
        },
    ),
    (
        OrderState::Fulfilling,
        LineHandler {
            subject: "Part of your order is being prepared",
            summary: "is being picked and packed",
        },
    ),
    (
        OrderState::Shipping,
        LineHandler {
            subject: "Part of your order has shipped",
            summary: "has been handed to the carrier",
        },
    ),
    (
        OrderState::Delivered,
        LineHandler {
            subject: "Part of your order was delivered",
            summary: "has been delivered",
        },
    ),
    (
        OrderState::Suspended,
        LineHandler {
            subject: "Part of your order is on hold",
            summary: "has been put on hold",
        },
    ),
];

/// The line-level handler for `state`, if the state has one.
pub fn line_handler(state: OrderState) -> Option<LineHandler> {
    LINE_HANDLERS
        .iter()
        .find(|(handled, _)| *handled == state)
        .map(|(_, handler)| *handler)
}

/// Applies state updates to lines and, once all lines agree, to the order.
pub struct OrderLifecycleSystem<S, N, B>
where
    S: OrderStore,
    N: Notifier,
    B: BillingService,
{
    store: S,
    notifier: N,
    billing: B,
}

impl<S, N, B> OrderLifecycleSystem<S, N, B>
where
    S: OrderStore,
    N: Notifier,
    B: BillingService,
{
    pub fn new(store: S, notifier: N, billing: B) -> Self {
        Self {
            store,
            notifier,
            billing,
        }
    }

    /// Moves one line to `new_state`.
    ///
    /// When every line of the order then shares `new_state` the order itself
    /// moves too; otherwise only the line changes and the customer gets the
    /// line-level email for that state.
    #[tracing::instrument(
        skip(self, command),
        fields(order_id = %command.order_id, line_id = %command.order_line_id, new_state = %command.new_state)
    )]
    pub async fn update_order(&self, command: UpdateOrder) -> Result<()> {
        let new_state = command.new_state;
        if !new_state.is_external_target() {
            return Err(SagaError::InvalidRequest(format!(
                "{new_state} is not a valid update target"
            )));
        }

        let order = self
            .store
            .get_order(command.order_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("order {}", command.order_id)))?;
        let lines = self.store.lines_for_order(order.id).await?;
        let target = lines
            .iter()
            .find(|line| line.id == command.order_line_id)
            .ok_or_else(|| SagaError::NotFound(format!("line {}", command.order_line_id)))?;

        let now = Utc::now();
        let mut line = target.clone();
        line.advance(new_state, now)?;

        let all_lines_agree = lines
            .iter()
            .all(|other| other.id == line.id || other.state == new_state);

        if all_lines_agree {
            let mut order = order;
            order.advance(new_state, now)?;
            let (order, _) = self.store.update_order_and_lines(&order, &[line]).await?;
            tracing::info!("order-level update applied");
            self.after_order_update(&order).await;
        } else {
            let handler = line_handler(new_state).ok_or_else(|| {
                SagaError::Conflict(format!("{new_state} cannot be applied to a single line"))
            })?;
            line.delayed = false;
            let line = self.store.update_line(&line).await?;
            tracing::info!("line-level update applied");
            let items = self.store.items_for_line(line.id).await?;
            self.notify_line(&order, &line, &items, handler).await;
        }
        Ok(())
    }

    async fn after_order_update(&self, order: &Order) {
        match order.state {
            OrderState::Shipping => {
                self.notify(order, "Your order has shipped", "All items are on their way.")
                    .await;
                if let Err(e) = self.billing.create_invoice(order).await {
                    tracing::warn!(order_id = %order.id, error = %e, "invoice creation failed");
                }
            }
            OrderState::Delivered => {
                self.notify(order, "Your order was delivered", "All items have been delivered.")
                    .await;
                if let Err(e) = self.billing.create_bill(order).await {
                    tracing::warn!(order_id = %order.id, error = %e, "bill creation failed");
                }
            }
            _ => {}
        }
    }

    async fn notify_line(
        &self,
        order: &Order,
        line: &OrderLine,
        items: &[OrderItem],
        handler: LineHandler,
    ) {
        let mut html = format!(
            "<p>The following items from order {} {}:</p><ul>",
            order.id, handler.summary
        );
        for item in items {
            html.push_str(&format!("<li>{} x {}</li>", item.quantity, item.product_name));
        }
        html.push_str("</ul>");

        if let Err(e) = self
            .notifier
            .send_html_email(&order.customer_email, handler.subject, &html)
            .await
        {
            tracing::warn!(line_id = %line.id, error = %e, "line update email failed");
        }
    }

    async fn notify(&self, order: &Order, subject: &str, body: &str) {
        if let Err(e) = self
            .notifier
            .send_basic_email(&order.customer_email, subject, body)
            .await
        {
            tracing::warn!(order_id = %order.id, error = %e, "order update email failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_table_covers_line_level_states() {
        for state in [
            OrderState::Processed,
            OrderState::Fulfilling,
            OrderState::Shipping,
            OrderState::Delivered,
            OrderState::Suspended,
        ] {
            assert!(line_handler(state).is_some(), "{state} has no handler");
        }
        for state in [
            OrderState::Processing,
            OrderState::Cancelled,
            OrderState::Returned,
        ] {
            assert!(line_handler(state).is_none(), "{state} should have no handler");
        }
    }

    #[test]
    fn test_each_handler_has_its_own_subject() {
        let mut subjects: Vec<_> = LINE_HANDLERS.iter().map(|(_, h)| h.subject).collect();
        subjects.sort();
        subjects.dedup();
        assert_eq!(subjects.len(), LINE_HANDLERS.len());
    }
}
