//! HTTP gateway and directory against a mock location server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{LocationId, OrderId};
use domain::{Address, GridPoint, Money, NewOrderItem, OrderItem, OrderLine, OrderLocation, ProductId};
use httpmock::prelude::*;
use saga::services::{DirectoryError, GatewayError, idempotency_key};
use saga::{
    HttpLocationDirectory, HttpLocationGateway, InMemoryLocationDirectory, LinePhase,
    LocationDirectory, LocationGateway, LocationRegistry,
};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(5);

fn location(id: i64, api_url: String) -> OrderLocation {
    OrderLocation::new(
        LocationId::new(id),
        format!("Warehouse {id}"),
        Address::new("PT", "Porto", GridPoint::new(0, 0)),
        api_url,
    )
}

async fn gateway_for(locations: Vec<OrderLocation>) -> HttpLocationGateway {
    let directory = InMemoryLocationDirectory::with_locations(locations);
    let registry = Arc::new(LocationRegistry::new(
        Arc::new(directory),
        Duration::from_secs(300),
    ));
    registry.refresh().await.unwrap();
    HttpLocationGateway::new(registry, TIMEOUT).unwrap()
}

fn line_at(location_id: i64) -> OrderLine {
    OrderLine::new(OrderId::new(), LocationId::new(location_id), Utc::now())
}

#[tokio::test]
async fn test_check_stock_sends_item_and_quantity() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/check")
                .query_param("itemId", "SKU-42")
                .query_param("itemQuantity", "3");
            then.status(200).json_body(json!(true));
        })
        .await;
    let warehouse = location(1, server.base_url());
    let gateway = gateway_for(vec![warehouse.clone()]).await;

    let available = gateway
        .check_stock(&warehouse, &ProductId::new("SKU-42"), 3)
        .await
        .unwrap();

    assert!(available);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_check_stock_false_is_not_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/check");
            then.status(200).json_body(json!(false));
        })
        .await;
    let warehouse = location(1, server.base_url());
    let gateway = gateway_for(vec![warehouse.clone()]).await;

    let available = gateway
        .check_stock(&warehouse, &ProductId::new("SKU-1"), 1)
        .await
        .unwrap();

    assert!(!available);
}

#[tokio::test]
async fn test_place_line_posts_phase_key_and_items() {
    let server = MockServer::start_async().await;
    let line = line_at(7);
    let key = idempotency_key(line.id, LinePhase::Place);
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/place")
                .body_contains("\"phase\":\"place\"")
                .body_contains(format!("\"idempotencyKey\":\"{key}\""))
                .body_contains("\"itemId\":\"SKU-9\"");
            then.status(200).json_body(json!(true));
        })
        .await;
    let gateway = gateway_for(vec![location(7, server.base_url())]).await;

    let mut item = OrderItem::new(
        line.order_id,
        &NewOrderItem::new("SKU-9", "Lamp", 2, Money::from_cents(2500)),
    );
    item.order_line_id = Some(line.id);

    gateway.place_line(&line, &[item]).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cancel_phases_share_the_cancel_endpoint() {
    let server = MockServer::start_async().await;
    let line = line_at(3);
    let mut mocks = Vec::new();
    for phase in [LinePhase::Start, LinePhase::Revert, LinePhase::Confirm] {
        let key = idempotency_key(line.id, phase);
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/cancel")
                    .body_contains(format!("\"phase\":\"{}\"", phase.as_str()))
                    .body_contains(format!("\"idempotencyKey\":\"{key}\""));
                then.status(200).json_body(json!(true));
            })
            .await;
        mocks.push(mock);
    }
    let gateway = gateway_for(vec![location(3, server.base_url())]).await;

    gateway.start_cancel(&line).await.unwrap();
    gateway.revert_cancel(&line).await.unwrap();
    gateway.confirm_cancel(&line).await.unwrap();

    for mock in &mocks {
        assert_eq!(mock.hits_async().await, 1);
    }
}

#[tokio::test]
async fn test_false_answer_is_a_rejection() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/cancel");
            then.status(200).json_body(json!(false));
        })
        .await;
    let gateway = gateway_for(vec![location(2, server.base_url())]).await;

    let err = gateway.start_cancel(&line_at(2)).await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Rejected {
            phase: LinePhase::Start,
            ..
        }
    ));
    assert_eq!(err.location(), LocationId::new(2));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/place");
            then.status(503).body("warehouse offline");
        })
        .await;
    let gateway = gateway_for(vec![location(2, server.base_url())]).await;

    let err = gateway.place_line(&line_at(2), &[]).await.unwrap_err();

    match err {
        GatewayError::Status {
            status, message, ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(message, "warehouse offline");
        }
        other => panic!("expected Status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreadable_body_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/check");
            then.status(200).body("maybe");
        })
        .await;
    let warehouse = location(1, server.base_url());
    let gateway = gateway_for(vec![warehouse.clone()]).await;

    let err = gateway
        .check_stock(&warehouse, &ProductId::new("SKU-1"), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Malformed { .. }));
}

#[tokio::test]
async fn test_line_for_unknown_location_is_not_sent() {
    let gateway = gateway_for(vec![]).await;

    let err = gateway.confirm_cancel(&line_at(99)).await.unwrap_err();

    assert!(matches!(err, GatewayError::UnknownLocation(id) if id == LocationId::new(99)));
}

#[tokio::test]
async fn test_directory_parses_listing() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/locations");
            then.status(200).json_body(json!([
                {
                    "id": 4,
                    "apiUrl": "http://north.local",
                    "addressCountry": "PT",
                    "addressCity": "Braga",
                    "gridX": 10,
                    "gridY": -3,
                    "name": "North"
                }
            ]));
        })
        .await;
    let directory = HttpLocationDirectory::new(server.url("/locations"), TIMEOUT).unwrap();

    let locations = directory.fetch_locations().await.unwrap();

    mock.assert_async().await;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].id, LocationId::new(4));
    assert_eq!(locations[0].api_url, "http://north.local");
    assert_eq!(locations[0].address.city, "Braga");
    assert_eq!(locations[0].grid(), GridPoint::new(10, -3));
}

#[tokio::test]
async fn test_directory_error_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/locations");
            then.status(500);
        })
        .await;
    let directory = HttpLocationDirectory::new(server.url("/locations"), TIMEOUT).unwrap();

    let err = directory.fetch_locations().await.unwrap_err();

    assert!(matches!(err, DirectoryError::Status { status: 500, .. }));
}
