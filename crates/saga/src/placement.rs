//! Order placement saga.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{LocationId, OrderId};
use domain::{
    GridPoint, Order, OrderItem, OrderLine, OrderState, PendingCancel, PlaceOrder, ProductId,
};
use order_store::OrderStore;

use crate::distance::nearest;
use crate::error::{Compensation, CompensationFailure, Result, SagaError};
use crate::registry::LocationRegistry;
use crate::services::{LocationGateway, Notifier};
use crate::state::PlacementStep;

/// Places an order across as many locations as its items need.
///
/// Either every line is committed at its location and the order ends up
/// `Processed`, or the order's rows are removed and any remote commits are
/// cancelled before the error is returned.
pub struct OrderPlacementSaga<S, G, N>
where
    S: OrderStore,
    G: LocationGateway,
    N: Notifier,
{
    store: S,
    gateway: G,
    notifier: N,
    registry: Arc<LocationRegistry>,
}

impl<S, G, N> OrderPlacementSaga<S, G, N>
where
    S: OrderStore,
    G: LocationGateway,
    N: Notifier,
{
    pub fn new(store: S, gateway: G, notifier: N, registry: Arc<LocationRegistry>) -> Self {
        Self {
            store,
            gateway,
            notifier,
            registry,
        }
    }

    /// Runs the saga for `command`, returning the new order's id.
    #[tracing::instrument(
        skip(self, command),
        fields(customer_id = %command.customer_id, item_count = command.items.len())
    )]
    pub async fn place_order(&self, command: PlaceOrder) -> Result<OrderId> {
        metrics::counter!("order_placements_total").increment(1);
        let started = Instant::now();

        let result = self.run(command).await;

        metrics::histogram!("order_placement_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(order_id) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(%order_id, "order placed");
            }
            Err(SagaError::UnavailableItems(products)) => {
                metrics::counter!("order_placement_conflicts_total").increment(1);
                tracing::info!(unavailable = products.len(), "order conflicted");
            }
            Err(e) if e.requires_manual_intervention() => {
                tracing::error!(error = %e, "order placement needs manual intervention");
            }
            Err(e) => tracing::warn!(error = %e, "order placement failed"),
        }
        result
    }

    async fn run(&self, command: PlaceOrder) -> Result<OrderId> {
        tracing::debug!(step = %PlacementStep::Validate, "saga step started");
        command.validate()?;

        // Step 1: root rows
        tracing::debug!(step = %PlacementStep::ReserveRows, "saga step started");
        let now = Utc::now();
        let order = Order::new(command.customer_id, &command.details, &command.items, now);
        let mut items: Vec<OrderItem> = command
            .items
            .iter()
            .map(|item| OrderItem::new(order.id, item))
            .collect();

        self.store.insert_order(&order).await?;
        if let Err(e) = self.store.insert_items(&items).await {
            return Err(self.abort(order.id, e.into()).await);
        }

        // Step 2: one location per item
        tracing::debug!(step = %PlacementStep::ResolveLocations, "saga step started");
        let resolved = match self
            .resolve_locations(order.shipping_address.grid, &items)
            .await
        {
            Ok(resolved) => resolved,
            Err(unavailable) => {
                // Stock checks are read-only; only local rows need undoing.
                return Err(self
                    .abort(order.id, SagaError::UnavailableItems(unavailable))
                    .await);
            }
        };

        // Step 4: group into lines
        tracing::debug!(step = %PlacementStep::GroupLines, "saga step started");
        let lines = group_into_lines(order.id, &mut items, &resolved, now);
        if let Err(e) = self.persist_lines(&lines, &items).await {
            return Err(self.abort(order.id, e).await);
        }

        // Step 5: remote commit, one line at a time
        tracing::debug!(step = %PlacementStep::CommitRemote, lines = lines.len(), "saga step started");
        let mut committed: Vec<OrderLine> = Vec::with_capacity(lines.len());
        for line in &lines {
            let line_items = items_of(line, &items);
            match self.gateway.place_line(line, &line_items).await {
                Ok(()) => committed.push(line.clone()),
                Err(e) => {
                    tracing::warn!(line_id = %line.id, location_id = %line.location_id, error = %e, "line commit failed");
                    return Err(self.compensate(order.id, &committed, e.into()).await);
                }
            }
        }

        // Step 6: finalize
        tracing::debug!(step = %PlacementStep::Finalize, "saga step started");
        self.send_confirmation(&order, &items).await;
        if let Err(e) = self.finalize(&order, &lines).await {
            return Err(self.compensate(order.id, &committed, e).await);
        }

        Ok(order.id)
    }

    /// Picks the nearest stocked location for every item, in item order.
    ///
    /// A location whose stock check fails is skipped for that item. Returns
    /// the products nobody could supply if any item is left without one.
    async fn resolve_locations(
        &self,
        target: GridPoint,
        items: &[OrderItem],
    ) -> std::result::Result<Vec<LocationId>, Vec<ProductId>> {
        let snapshot = self.registry.snapshot();
        let mut resolved = Vec::with_capacity(items.len());
        let mut unavailable = Vec::new();

        for item in items {
            let mut stocked = Vec::new();
            for location in snapshot.locations() {
                match self
                    .gateway
                    .check_stock(location, &item.product_id, item.quantity)
                    .await
                {
                    Ok(true) => stocked.push(location),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(location_id = %location.id, product_id = %item.product_id, error = %e, "stock check failed");
                    }
                }
            }

            match nearest(stocked, target) {
                Some(location) => resolved.push(location.id),
                None => unavailable.push(item.product_id.clone()),
            }
        }

        if unavailable.is_empty() {
            Ok(resolved)
        } else {
            Err(unavailable)
        }
    }

    async fn persist_lines(&self, lines: &[OrderLine], items: &[OrderItem]) -> Result<()> {
        self.store.insert_lines(lines).await?;
        self.store.update_items(items).await?;
        Ok(())
    }

    async fn finalize(&self, order: &Order, lines: &[OrderLine]) -> Result<()> {
        let now = Utc::now();
        let mut order = order.clone();
        order.advance(OrderState::Processed, now)?;
        let mut lines = lines.to_vec();
        for line in &mut lines {
            line.advance(OrderState::Processed, now)?;
        }
        self.store.update_order_and_lines(&order, &lines).await?;
        Ok(())
    }

    async fn send_confirmation(&self, order: &Order, items: &[OrderItem]) {
        let subject = format!("Order {} confirmed", order.id);
        let mut body = format!("Thank you for your order. Total: {}\n", order.total_price);
        for item in items {
            body.push_str(&format!("- {} x {}\n", item.quantity, item.product_name));
        }
        if let Err(e) = self
            .notifier
            .send_basic_email(&order.customer_email, &subject, &body)
            .await
        {
            tracing::warn!(order_id = %order.id, error = %e, "confirmation email failed");
        }
    }

    /// Cancels every committed line and removes the order's rows.
    ///
    /// Returns `cause` unchanged when nothing remote was committed and the
    /// rows were removed; otherwise wraps it in `PartialCommit`.
    async fn compensate(
        &self,
        order_id: OrderId,
        committed: &[OrderLine],
        cause: SagaError,
    ) -> SagaError {
        metrics::counter!("saga_compensations_total").increment(1);
        tracing::info!(%order_id, committed = committed.len(), "compensating placement");

        let mut failures = Vec::new();
        for line in committed {
            if let Some(failure) = self.cancel_line(line).await {
                failures.push(failure);
            }
        }
        if let Some(failure) = self.discard_rows(order_id).await {
            failures.push(failure);
        }

        if committed.is_empty() && failures.is_empty() {
            return cause;
        }
        SagaError::partial(cause, Compensation::from_failures(failures))
    }

    /// Starts and confirms the cancellation of one committed line.
    ///
    /// A confirmation the location refuses is queued for the retry loop.
    async fn cancel_line(&self, line: &OrderLine) -> Option<CompensationFailure> {
        if let Err(e) = self.gateway.start_cancel(line).await {
            return Some(CompensationFailure::new("start_cancel", line.id, e));
        }
        if let Err(e) = self.gateway.confirm_cancel(line).await {
            tracing::warn!(line_id = %line.id, error = %e, "confirm cancel failed, queueing retry");
            let pending = PendingCancel::new(line.clone(), Utc::now());
            if let Err(e) = self.store.add_pending_cancel(&pending).await {
                return Some(CompensationFailure::new("queue_pending_cancel", line.id, e));
            }
        }
        None
    }

    /// Undoes a placement that has not reached any location yet.
    ///
    /// `cause` comes back unchanged once the rows are gone; a failed delete
    /// is reported alongside it.
    async fn abort(&self, order_id: OrderId, cause: SagaError) -> SagaError {
        match self.discard_rows(order_id).await {
            Some(failure) => SagaError::partial(cause, Compensation::Incomplete(vec![failure])),
            None => cause,
        }
    }

    async fn discard_rows(&self, order_id: OrderId) -> Option<CompensationFailure> {
        match self.store.delete_order(order_id).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "failed to delete order rows");
                Some(CompensationFailure::new("delete_rows", order_id, e))
            }
        }
    }
}

/// Creates one line per distinct location and assigns each item to the line
/// of the location it was resolved to. `locations[i]` belongs to `items[i]`.
///
/// Lines come out ordered by location id.
pub fn group_into_lines(
    order_id: OrderId,
    items: &mut [OrderItem],
    locations: &[LocationId],
    now: DateTime<Utc>,
) -> Vec<OrderLine> {
    let mut by_location: BTreeMap<LocationId, OrderLine> = BTreeMap::new();
    for (item, location_id) in items.iter_mut().zip(locations) {
        let line = by_location
            .entry(*location_id)
            .or_insert_with(|| OrderLine::new(order_id, *location_id, now));
        item.order_line_id = Some(line.id);
    }
    by_location.into_values().collect()
}

fn items_of(line: &OrderLine, items: &[OrderItem]) -> Vec<OrderItem> {
    items
        .iter()
        .filter(|item| item.order_line_id == Some(line.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, NewOrderItem};

    fn items(order_id: OrderId, count: usize) -> Vec<OrderItem> {
        (0..count)
            .map(|i| {
                OrderItem::new(
                    order_id,
                    &NewOrderItem::new(format!("SKU-{i}"), "Thing", 1, Money::from_cents(100)),
                )
            })
            .collect()
    }

    #[test]
    fn test_group_creates_one_line_per_distinct_location() {
        let order_id = OrderId::new();
        let mut items = items(order_id, 4);
        let locations = [
            LocationId::new(7),
            LocationId::new(3),
            LocationId::new(7),
            LocationId::new(3),
        ];

        let lines = group_into_lines(order_id, &mut items, &locations, Utc::now());

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].location_id, LocationId::new(3));
        assert_eq!(lines[1].location_id, LocationId::new(7));
        for (item, location_id) in items.iter().zip(locations) {
            let line = lines
                .iter()
                .find(|line| Some(line.id) == item.order_line_id)
                .unwrap();
            assert_eq!(line.location_id, location_id);
            assert_eq!(line.order_id, order_id);
        }
    }

    #[test]
    fn test_group_single_location() {
        let order_id = OrderId::new();
        let mut items = items(order_id, 3);
        let locations = [LocationId::new(1); 3];

        let lines = group_into_lines(order_id, &mut items, &locations, Utc::now());

        assert_eq!(lines.len(), 1);
        assert!(items.iter().all(|i| i.order_line_id == Some(lines[0].id)));
        assert_eq!(items_of(&lines[0], &items).len(), 3);
    }
}
