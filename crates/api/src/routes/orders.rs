//! Order placement, cancellation and line state endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CustomerId, OrderId, OrderLineId};
use domain::{
    Address, GridPoint, Money, NewOrderItem, Order, OrderDetails, OrderLine, OrderState,
    PlaceOrder, UpdateOrder,
};
use order_store::OrderStore;
use saga::{
    LocationGateway, LocationRegistry, LoggingBillingService, LoggingNotifier,
    OrderCancellationProtocol, OrderLifecycleSystem, OrderPlacementSaga, SagaError,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore, G: LocationGateway> {
    pub placement: OrderPlacementSaga<S, G, LoggingNotifier>,
    pub cancellation: OrderCancellationProtocol<S, G, LoggingNotifier>,
    pub lifecycle: OrderLifecycleSystem<S, LoggingNotifier, LoggingBillingService>,
    pub registry: Arc<LocationRegistry>,
    pub store: S,
}

impl<S, G> AppState<S, G>
where
    S: OrderStore + Clone,
    G: LocationGateway + Clone,
{
    pub fn new(store: S, gateway: G, registry: Arc<LocationRegistry>) -> Self {
        Self {
            placement: OrderPlacementSaga::new(
                store.clone(),
                gateway.clone(),
                LoggingNotifier,
                Arc::clone(&registry),
            ),
            cancellation: OrderCancellationProtocol::new(store.clone(), gateway, LoggingNotifier),
            lifecycle: OrderLifecycleSystem::new(
                store.clone(),
                LoggingNotifier,
                LoggingBillingService,
            ),
            registry,
            store,
        }
    }
}

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub customer_id: Option<String>,
    pub customer_email: String,
    pub shipping_address: AddressRequest,
    pub billing_address: Option<AddressRequest>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub country: String,
    pub city: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub postal_code: String,
    pub grid_x: i64,
    pub grid_y: i64,
}

impl From<AddressRequest> for Address {
    fn from(req: AddressRequest) -> Self {
        Address::new(req.country, req.city, GridPoint::new(req.grid_x, req.grid_y))
            .with_street(req.street, req.postal_code)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct LineStateRequest {
    pub state: String,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlacedResponse {
    pub order_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub state: String,
    pub total_cents: i64,
    pub total_quantity: u32,
    pub delayed: bool,
    pub problem: bool,
    pub lines: Vec<LineResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineResponse {
    pub id: String,
    pub location_id: i64,
    pub state: String,
    pub delayed: bool,
    pub problem: bool,
}

impl OrderResponse {
    fn new(order: Order, lines: Vec<OrderLine>) -> Self {
        Self {
            id: order.id.to_string(),
            customer_id: order.customer_id.to_string(),
            state: order.state.to_string(),
            total_cents: order.total_price.cents(),
            total_quantity: order.total_quantity,
            delayed: order.delayed,
            problem: order.problem,
            lines: lines
                .into_iter()
                .map(|line| LineResponse {
                    id: line.id.to_string(),
                    location_id: line.location_id.as_i64(),
                    state: line.state.to_string(),
                    delayed: line.delayed,
                    problem: line.problem,
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order across the locations that stock its items.
#[tracing::instrument(skip(state, req))]
pub async fn place<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderPlacedResponse>), ApiError>
where
    S: OrderStore + 'static,
    G: LocationGateway + 'static,
{
    let customer_id = match req.customer_id {
        Some(ref id) => CustomerId::from_uuid(parse_uuid(id)?),
        None => CustomerId::new(),
    };
    let shipping = Address::from(req.shipping_address.clone());
    let billing = req
        .billing_address
        .map(Address::from)
        .unwrap_or_else(|| shipping.clone());
    let items = req
        .items
        .into_iter()
        .map(|item| {
            NewOrderItem::new(
                item.product_id,
                item.product_name,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let command = PlaceOrder::new(
        customer_id,
        OrderDetails::new(req.customer_email, shipping, billing),
        items,
    );
    let order_id = state.placement.place_order(command).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderPlacedResponse {
            order_id: order_id.to_string(),
        }),
    ))
}

/// GET /orders/{id}: the order with its lines.
#[tracing::instrument(skip(state))]
pub async fn get<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderStore + 'static,
    G: LocationGateway + 'static,
{
    let order_id = OrderId::from_uuid(parse_uuid(&id)?);
    let order = state
        .store
        .get_order(order_id)
        .await
        .map_err(SagaError::from)?
        .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))?;
    let lines = state
        .store
        .lines_for_order(order_id)
        .await
        .map_err(SagaError::from)?;

    Ok(Json(OrderResponse::new(order, lines)))
}

/// POST /orders/{id}/cancel: cancel at every location, then locally.
///
/// Answers 202 when some locations have not confirmed yet; the retry loop
/// finishes those.
#[tracing::instrument(skip(state))]
pub async fn cancel<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    S: OrderStore + 'static,
    G: LocationGateway + 'static,
{
    let order_id = OrderId::from_uuid(parse_uuid(&id)?);
    state.cancellation.cancel_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /orders/{id}/lines/{line_id}/state: a location reports a new state.
#[tracing::instrument(skip(state, req))]
pub async fn update_line_state<S, G>(
    State(state): State<Arc<AppState<S, G>>>,
    Path((id, line_id)): Path<(String, String)>,
    Json(req): Json<LineStateRequest>,
) -> Result<StatusCode, ApiError>
where
    S: OrderStore + 'static,
    G: LocationGateway + 'static,
{
    let order_id = OrderId::from_uuid(parse_uuid(&id)?);
    let line_id = OrderLineId::from_uuid(parse_uuid(&line_id)?);
    let new_state: OrderState = req
        .state
        .parse()
        .map_err(|e: domain::OrderError| ApiError::BadRequest(e.to_string()))?;

    state
        .lifecycle
        .update_order(UpdateOrder::new(order_id, line_id, new_state))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_uuid(id: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
