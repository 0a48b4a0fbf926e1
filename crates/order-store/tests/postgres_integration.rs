//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need Docker, so they are
//! ignored by default. Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CustomerId, LocationId};
use domain::{
    Address, GridPoint, Money, NewOrderItem, Order, OrderDetails, OrderItem, OrderLine,
    OrderProblem, OrderState, PendingCancel, ProblemKind, StateThreshold, ThresholdKind,
};
use order_store::{LineFlag, OrderStore, PostgresOrderStore, StoreError};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_order_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE orders, order_lines, order_items, order_problems, \
         order_state_delay_times, order_state_expire_times, pending_cancels",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresOrderStore::new(pool)
}

fn sample_order() -> (Order, Vec<OrderItem>) {
    let address = Address::new("PT", "Porto", GridPoint::new(2, 3));
    let details = OrderDetails::new("buyer@example.com", address.clone(), address);
    let requested = vec![
        NewOrderItem::new("SKU-A", "Widget", 2, Money::from_cents(1000)),
        NewOrderItem::new("SKU-B", "Gadget", 1, Money::from_cents(2500)),
    ];
    let order = Order::new(CustomerId::new(), &details, &requested, Utc::now());
    let items = requested
        .iter()
        .map(|item| OrderItem::new(order.id, item))
        .collect();
    (order, items)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn insert_and_load_order_graph() {
    let store = get_test_store().await;
    let (order, mut items) = sample_order();

    store.insert_order(&order).await.unwrap();
    store.insert_items(&items).await.unwrap();

    let line = OrderLine::new(order.id, LocationId::new(1), Utc::now());
    store.insert_lines(std::slice::from_ref(&line)).await.unwrap();
    for item in &mut items {
        item.order_line_id = Some(line.id);
    }
    store.update_items(&items).await.unwrap();

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.total_price, Money::from_cents(4500));
    assert_eq!(loaded.total_quantity, 3);
    assert_eq!(loaded.shipping_address.city, "Porto");

    assert_eq!(store.lines_for_order(order.id).await.unwrap().len(), 1);
    assert_eq!(store.items_for_line(line.id).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn delete_order_cascades_to_lines_and_items() {
    let store = get_test_store().await;
    let (order, items) = sample_order();
    store.insert_order(&order).await.unwrap();
    store.insert_items(&items).await.unwrap();
    let line = OrderLine::new(order.id, LocationId::new(1), Utc::now());
    store.insert_lines(&[line.clone()]).await.unwrap();

    store.delete_order(order.id).await.unwrap();

    assert!(store.get_order(order.id).await.unwrap().is_none());
    assert!(store.get_line(line.id).await.unwrap().is_none());
    assert!(store.items_for_order(order.id).await.unwrap().is_empty());

    let again = store.delete_order(order.id).await;
    assert!(matches!(again, Err(StoreError::NoRowsAffected { .. })));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_version_update_is_rejected() {
    let store = get_test_store().await;
    let (order, _) = sample_order();
    store.insert_order(&order).await.unwrap();

    let mut first = order.clone();
    first.advance(OrderState::Processed, Utc::now()).unwrap();
    let stored = store.update_order(&first).await.unwrap();
    assert_eq!(stored.version, order.version + 1);

    let mut stale = order.clone();
    stale.advance(OrderState::Cancelled, Utc::now()).unwrap();
    let result = store.update_order(&stale).await;
    assert!(matches!(result, Err(StoreError::NoRowsAffected { .. })));

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.state, OrderState::Processed);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn order_and_lines_update_rolls_back_together() {
    let store = get_test_store().await;
    let (order, _) = sample_order();
    store.insert_order(&order).await.unwrap();
    let line = OrderLine::new(order.id, LocationId::new(4), Utc::now());
    store.insert_lines(&[line.clone()]).await.unwrap();

    let mut next_order = order.clone();
    next_order.advance(OrderState::Cancelled, Utc::now()).unwrap();
    let mut stale_line = line.clone();
    stale_line.version += 5;

    let result = store
        .update_order_and_lines(&next_order, &[stale_line])
        .await;
    assert!(result.is_err());

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.state, OrderState::Processing);
    assert_eq!(loaded.version, order.version);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_lines_respect_cutoff_and_flag() {
    let store = get_test_store().await;
    let (order, _) = sample_order();
    store.insert_order(&order).await.unwrap();

    let now = Utc::now();
    let mut old = OrderLine::new(order.id, LocationId::new(1), now - Duration::hours(5));
    old.state = OrderState::Fulfilling;
    let mut old_delayed = old.clone();
    old_delayed.id = common::OrderLineId::new();
    old_delayed.delayed = true;
    let mut fresh = OrderLine::new(order.id, LocationId::new(2), now);
    fresh.state = OrderState::Fulfilling;

    store
        .insert_lines(&[old.clone(), old_delayed, fresh])
        .await
        .unwrap();

    let stale = store
        .stale_lines(OrderState::Fulfilling, now - Duration::hours(1), LineFlag::Delayed)
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, old.id);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn escalation_is_unique_per_line_and_kind() {
    let store = get_test_store().await;
    let (order, _) = sample_order();
    store.insert_order(&order).await.unwrap();
    let line = OrderLine::new(order.id, LocationId::new(1), Utc::now());
    store.insert_lines(&[line.clone()]).await.unwrap();

    let problem = OrderProblem::for_line(&line, ProblemKind::Expired, Utc::now());
    let flagged = store.escalate_line(&problem, &line).await.unwrap();
    assert!(flagged.problem);

    let duplicate = OrderProblem::for_line(&flagged, ProblemKind::Expired, Utc::now());
    let result = store.escalate_line(&duplicate, &flagged).await;
    assert!(matches!(result, Err(StoreError::Duplicate { .. })));

    assert_eq!(store.problems_for_order(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn thresholds_upsert_per_state() {
    let store = get_test_store().await;

    store
        .set_threshold(
            ThresholdKind::Delay,
            StateThreshold::new(OrderState::Shipping, Duration::hours(24)),
        )
        .await
        .unwrap();
    store
        .set_threshold(
            ThresholdKind::Delay,
            StateThreshold::new(OrderState::Shipping, Duration::hours(36)),
        )
        .await
        .unwrap();

    let delay = store.thresholds(ThresholdKind::Delay).await.unwrap();
    assert_eq!(delay.len(), 1);
    assert_eq!(delay[0].after, Duration::hours(36));
    assert!(store.thresholds(ThresholdKind::Expire).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn pending_cancel_queue_survives_order_deletion() {
    let store = get_test_store().await;
    let (order, _) = sample_order();
    store.insert_order(&order).await.unwrap();
    let line = OrderLine::new(order.id, LocationId::new(9), Utc::now());
    store.insert_lines(&[line.clone()]).await.unwrap();

    store
        .add_pending_cancel(&PendingCancel::new(line.clone(), Utc::now()))
        .await
        .unwrap();
    store.delete_order(order.id).await.unwrap();

    assert_eq!(store.record_cancel_attempt(line.id).await.unwrap(), 1);
    store
        .add_pending_cancel(&PendingCancel::new(line.clone(), Utc::now()))
        .await
        .unwrap();

    let queued = store.pending_cancels().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].line.location_id, LocationId::new(9));
    assert_eq!(queued[0].attempts, 1);

    assert!(store.remove_pending_cancel(line.id).await.unwrap());
    assert!(!store.remove_pending_cancel(line.id).await.unwrap());
}
