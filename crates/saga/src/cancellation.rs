//! Two-phase order cancellation.

use chrono::Utc;
use common::OrderId;
use domain::{Order, OrderLine, OrderState, PendingCancel};
use order_store::OrderStore;

use crate::error::{Compensation, CompensationFailure, Result, SagaError};
use crate::services::{LocationGateway, Notifier};

/// Cancels an order at every location holding one of its lines.
///
/// Each line goes through start, then confirm. A failure before the local
/// rows are marked `Cancelled` reverts the started lines; a failure after
/// it leaves the order cancelled and queues the unconfirmed lines for
/// the pending-cancel retry loop.
pub struct OrderCancellationProtocol<S, G, N>
where
    S: OrderStore,
    G: LocationGateway,
    N: Notifier,
{
    store: S,
    gateway: G,
    notifier: N,
}

impl<S, G, N> OrderCancellationProtocol<S, G, N>
where
    S: OrderStore,
    G: LocationGateway,
    N: Notifier,
{
    pub fn new(store: S, gateway: G, notifier: N) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<()> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))?;
        let lines = self.store.lines_for_order(order_id).await?;

        ensure_cancellable(&order, &lines)?;

        let now = Utc::now();
        let mut cancelled_order = order.clone();
        cancelled_order.advance(OrderState::Cancelled, now)?;
        let mut cancelled_lines = lines.clone();
        for line in &mut cancelled_lines {
            line.advance(OrderState::Cancelled, now)?;
        }

        // Phase 1: tentative hold at every location
        let mut started: Vec<&OrderLine> = Vec::with_capacity(lines.len());
        for line in &lines {
            match self.gateway.start_cancel(line).await {
                Ok(()) => started.push(line),
                Err(e) => {
                    tracing::warn!(line_id = %line.id, error = %e, "start cancel failed, reverting");
                    let compensation = self.revert(&started).await;
                    let cause = SagaError::from(e);
                    return Err(if compensation.is_complete() {
                        cause
                    } else {
                        SagaError::partial(cause, compensation)
                    });
                }
            }
        }

        // Phase 2: local state
        let (_, stored_lines) = match self
            .store
            .update_order_and_lines(&cancelled_order, &cancelled_lines)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "cancel persist failed, reverting");
                let compensation = self.revert(&started).await;
                return Err(SagaError::partial(e.into(), compensation));
            }
        };
        metrics::counter!("orders_cancelled_total").increment(1);
        self.send_cancellation(&order).await;

        // Phase 3: make it final
        let mut unconfirmed = Vec::new();
        for line in &stored_lines {
            if let Err(e) = self.gateway.confirm_cancel(line).await {
                tracing::warn!(line_id = %line.id, error = %e, "confirm cancel failed, queueing retry");
                let pending = PendingCancel::new(line.clone(), Utc::now());
                if let Err(e) = self.store.add_pending_cancel(&pending).await {
                    tracing::error!(line_id = %line.id, error = %e, "failed to queue pending cancel");
                }
                unconfirmed.push(line.id);
            }
        }

        if !unconfirmed.is_empty() {
            return Err(SagaError::CancelPending(unconfirmed));
        }
        tracing::info!("order cancelled");
        Ok(())
    }

    async fn revert(&self, started: &[&OrderLine]) -> Compensation {
        let mut failures = Vec::new();
        for line in started {
            if let Err(e) = self.gateway.revert_cancel(line).await {
                failures.push(CompensationFailure::new("revert_cancel", line.id, e));
            }
        }
        Compensation::from_failures(failures)
    }

    async fn send_cancellation(&self, order: &Order) {
        let subject = format!("Order {} cancelled", order.id);
        let body = format!(
            "Your order placed on {} has been cancelled.",
            order.order_date.format("%Y-%m-%d")
        );
        if let Err(e) = self
            .notifier
            .send_basic_email(&order.customer_email, &subject, &body)
            .await
        {
            tracing::warn!(order_id = %order.id, error = %e, "cancellation email failed");
        }
    }
}

/// Rejects the cancellation unless the order and every line are still
/// before fulfillment. An order without lines is still being placed.
pub fn ensure_cancellable(order: &Order, lines: &[OrderLine]) -> Result<()> {
    if lines.is_empty() {
        return Err(SagaError::Conflict(format!(
            "order {} has no lines yet",
            order.id
        )));
    }
    if !order.state.is_cancellable() {
        return Err(SagaError::Conflict(format!(
            "order {} is {}",
            order.id, order.state
        )));
    }
    if let Some(line) = lines.iter().find(|line| !line.state.is_cancellable()) {
        return Err(SagaError::Conflict(format!(
            "line {} is {}",
            line.id, line.state
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CustomerId, LocationId};
    use domain::{Address, GridPoint, Money, NewOrderItem, OrderDetails};

    fn order_with_lines(states: &[OrderState]) -> (Order, Vec<OrderLine>) {
        let address = Address::new("PT", "Aveiro", GridPoint::new(0, 0));
        let details = OrderDetails::new("c@example.com", address.clone(), address);
        let items = [NewOrderItem::new("SKU", "Thing", 1, Money::from_cents(1))];
        let order = Order::new(CustomerId::new(), &details, &items, Utc::now());
        let lines = states
            .iter()
            .enumerate()
            .map(|(i, state)| {
                let mut line = OrderLine::new(order.id, LocationId::new(i as i64), Utc::now());
                line.state = *state;
                line
            })
            .collect();
        (order, lines)
    }

    #[test]
    fn test_pre_fulfillment_lines_are_cancellable() {
        let (order, lines) = order_with_lines(&[OrderState::Processing, OrderState::Processed]);
        assert!(ensure_cancellable(&order, &lines).is_ok());
    }

    #[test]
    fn test_any_later_line_blocks_cancellation() {
        for blocking in [
            OrderState::Fulfilling,
            OrderState::Shipping,
            OrderState::Delivered,
            OrderState::Cancelled,
            OrderState::Returned,
            OrderState::Suspended,
        ] {
            let (order, lines) = order_with_lines(&[OrderState::Processed, blocking]);
            assert!(
                matches!(ensure_cancellable(&order, &lines), Err(SagaError::Conflict(_))),
                "{blocking} should block"
            );
        }
    }

    #[test]
    fn test_order_state_is_checked_too() {
        let (mut order, lines) = order_with_lines(&[OrderState::Processed]);
        order.state = OrderState::Shipping;
        assert!(ensure_cancellable(&order, &lines).is_err());
    }

    #[test]
    fn test_order_without_lines_is_a_conflict() {
        let (order, lines) = order_with_lines(&[]);
        assert!(matches!(
            ensure_cancellable(&order, &lines),
            Err(SagaError::Conflict(_))
        ));
    }
}
