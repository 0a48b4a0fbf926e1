//! Location gateway trait, HTTP client and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{LocationId, OrderId, OrderLineId};
use domain::{OrderItem, OrderLine, OrderLocation, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{read, write};
use crate::registry::LocationRegistry;

/// Which step of the line protocol a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinePhase {
    /// Commit the line's reservation.
    Place,
    /// Tentatively hold a cancellation.
    Start,
    /// Undo a started cancellation.
    Revert,
    /// Make a started cancellation final.
    Confirm,
}

impl LinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinePhase::Place => "place",
            LinePhase::Start => "start",
            LinePhase::Revert => "revert",
            LinePhase::Confirm => "confirm",
        }
    }

    /// Path segment of the remote endpoint serving this phase.
    pub fn endpoint(&self) -> &'static str {
        match self {
            LinePhase::Place => "place",
            LinePhase::Start | LinePhase::Revert | LinePhase::Confirm => "cancel",
        }
    }
}

impl std::fmt::Display for LinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key a location can use to drop repeated requests for the same line and phase.
pub fn idempotency_key(line_id: OrderLineId, phase: LinePhase) -> String {
    format!("{line_id}:{}", phase.as_str())
}

/// Body of every line request sent to a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub phase: LinePhase,
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub order_line_id: OrderLineId,
    pub location_id: LocationId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRequest {
    pub item_id: ProductId,
    pub quantity: u32,
}

impl LineRequest {
    pub fn new(phase: LinePhase, line: &OrderLine, items: &[OrderItem]) -> Self {
        Self {
            phase,
            idempotency_key: idempotency_key(line.id, phase),
            order_id: line.order_id,
            order_line_id: line.id,
            location_id: line.location_id,
            items: items
                .iter()
                .map(|item| LineItemRequest {
                    item_id: item.product_id.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

/// Errors from a location call. The gateway never retries.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("location {0} is not in the registry")]
    UnknownLocation(LocationId),

    #[error("request to location {location} failed: {reason}")]
    Transport { location: LocationId, reason: String },

    #[error("location {location} answered {status}: {message}")]
    Status {
        location: LocationId,
        status: u16,
        message: String,
    },

    #[error("location {location} sent an unreadable response: {reason}")]
    Malformed { location: LocationId, reason: String },

    #[error("location {location} rejected {phase}")]
    Rejected { location: LocationId, phase: LinePhase },
}

impl GatewayError {
    /// The location the failed call was addressed to.
    pub fn location(&self) -> LocationId {
        match self {
            GatewayError::UnknownLocation(location)
            | GatewayError::Transport { location, .. }
            | GatewayError::Status { location, .. }
            | GatewayError::Malformed { location, .. }
            | GatewayError::Rejected { location, .. } => *location,
        }
    }
}

/// Calls to the remote fulfillment locations.
#[async_trait]
pub trait LocationGateway: Send + Sync {
    /// Asks `location` whether it can supply `quantity` of `product_id`.
    async fn check_stock(
        &self,
        location: &OrderLocation,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, GatewayError>;

    /// Commits the line's reservation at its location.
    async fn place_line(&self, line: &OrderLine, items: &[OrderItem]) -> Result<(), GatewayError>;

    /// Tentatively cancels the line.
    async fn start_cancel(&self, line: &OrderLine) -> Result<(), GatewayError>;

    /// Undoes a started cancellation.
    async fn revert_cancel(&self, line: &OrderLine) -> Result<(), GatewayError>;

    /// Makes a started cancellation final. Safe to repeat.
    async fn confirm_cancel(&self, line: &OrderLine) -> Result<(), GatewayError>;
}

/// Gateway speaking the locations' HTTP protocol.
///
/// Line requests are addressed through the registry by the line's
/// location id, so a location that left the directory is reported as
/// [`GatewayError::UnknownLocation`].
#[derive(Clone)]
pub struct HttpLocationGateway {
    http: reqwest::Client,
    registry: Arc<LocationRegistry>,
}

impl HttpLocationGateway {
    pub fn new(registry: Arc<LocationRegistry>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, registry })
    }

    async fn read_bool(
        location: LocationId,
        response: reqwest::Response,
    ) -> Result<bool, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                location,
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<bool>()
            .await
            .map_err(|e| GatewayError::Malformed {
                location,
                reason: e.to_string(),
            })
    }

    async fn send_line(
        &self,
        phase: LinePhase,
        line: &OrderLine,
        items: &[OrderItem],
    ) -> Result<(), GatewayError> {
        let location = self
            .registry
            .by_id(line.location_id)
            .ok_or(GatewayError::UnknownLocation(line.location_id))?;
        let url = format!("{}/{}", location.api_url, phase.endpoint());

        let response = self
            .http
            .post(url)
            .json(&LineRequest::new(phase, line, items))
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                location: location.id,
                reason: e.to_string(),
            })?;

        if Self::read_bool(location.id, response).await? {
            Ok(())
        } else {
            Err(GatewayError::Rejected {
                location: location.id,
                phase,
            })
        }
    }
}

#[async_trait]
impl LocationGateway for HttpLocationGateway {
    #[tracing::instrument(skip(self, location), fields(location_id = %location.id))]
    async fn check_stock(
        &self,
        location: &OrderLocation,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, GatewayError> {
        let quantity = quantity.to_string();
        let response = self
            .http
            .get(format!("{}/check", location.api_url))
            .query(&[("itemId", product_id.as_str()), ("itemQuantity", quantity.as_str())])
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                location: location.id,
                reason: e.to_string(),
            })?;
        Self::read_bool(location.id, response).await
    }

    #[tracing::instrument(skip(self, line, items), fields(line_id = %line.id, location_id = %line.location_id))]
    async fn place_line(&self, line: &OrderLine, items: &[OrderItem]) -> Result<(), GatewayError> {
        self.send_line(LinePhase::Place, line, items).await
    }

    #[tracing::instrument(skip(self, line), fields(line_id = %line.id, location_id = %line.location_id))]
    async fn start_cancel(&self, line: &OrderLine) -> Result<(), GatewayError> {
        self.send_line(LinePhase::Start, line, &[]).await
    }

    #[tracing::instrument(skip(self, line), fields(line_id = %line.id, location_id = %line.location_id))]
    async fn revert_cancel(&self, line: &OrderLine) -> Result<(), GatewayError> {
        self.send_line(LinePhase::Revert, line, &[]).await
    }

    #[tracing::instrument(skip(self, line), fields(line_id = %line.id, location_id = %line.location_id))]
    async fn confirm_cancel(&self, line: &OrderLine) -> Result<(), GatewayError> {
        self.send_line(LinePhase::Confirm, line, &[]).await
    }
}

/// A line request received by [`InMemoryLocationGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCall {
    pub phase: LinePhase,
    pub location_id: LocationId,
    pub line_id: OrderLineId,
    pub idempotency_key: String,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    stock: HashMap<(LocationId, ProductId), u32>,
    placed: HashSet<OrderLineId>,
    cancelled: HashSet<OrderLineId>,
    calls: Vec<LineCall>,
    stock_checks: usize,
    failing_checks: HashSet<LocationId>,
    failing_phases: HashSet<(LocationId, LinePhase)>,
}

/// In-memory location gateway for testing.
///
/// Every line request is recorded, including the ones made to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocationGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryLocationGateway {
    /// Creates a new in-memory gateway with no stock anywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how much of `product_id` the location holds.
    pub fn set_stock(&self, location_id: LocationId, product_id: impl Into<ProductId>, quantity: u32) {
        write(&self.state)
            .stock
            .insert((location_id, product_id.into()), quantity);
    }

    /// Makes stock checks against the location fail.
    pub fn set_fail_on_check(&self, location_id: LocationId, fail: bool) {
        let mut state = write(&self.state);
        if fail {
            state.failing_checks.insert(location_id);
        } else {
            state.failing_checks.remove(&location_id);
        }
    }

    /// Makes requests of `phase` to the location fail.
    pub fn set_fail_on(&self, location_id: LocationId, phase: LinePhase, fail: bool) {
        let mut state = write(&self.state);
        if fail {
            state.failing_phases.insert((location_id, phase));
        } else {
            state.failing_phases.remove(&(location_id, phase));
        }
    }

    /// All line requests received, in order.
    pub fn calls(&self) -> Vec<LineCall> {
        read(&self.state).calls.clone()
    }

    /// Line requests of one phase, in order.
    pub fn calls_for(&self, phase: LinePhase) -> Vec<LineCall> {
        read(&self.state)
            .calls
            .iter()
            .filter(|call| call.phase == phase)
            .cloned()
            .collect()
    }

    /// Number of stock checks received.
    pub fn stock_check_count(&self) -> usize {
        read(&self.state).stock_checks
    }

    /// Returns true if the line is placed and not cancelled.
    pub fn is_held(&self, line_id: OrderLineId) -> bool {
        let state = read(&self.state);
        state.placed.contains(&line_id) && !state.cancelled.contains(&line_id)
    }

    /// Returns true if a cancellation of the line was confirmed.
    pub fn is_cancelled(&self, line_id: OrderLineId) -> bool {
        read(&self.state).cancelled.contains(&line_id)
    }

    fn record(&self, phase: LinePhase, line: &OrderLine) -> Result<(), GatewayError> {
        let mut state = write(&self.state);
        state.calls.push(LineCall {
            phase,
            location_id: line.location_id,
            line_id: line.id,
            idempotency_key: idempotency_key(line.id, phase),
        });
        if state.failing_phases.contains(&(line.location_id, phase)) {
            return Err(GatewayError::Transport {
                location: line.location_id,
                reason: format!("{phase} unavailable"),
            });
        }
        match phase {
            LinePhase::Place => {
                state.placed.insert(line.id);
            }
            LinePhase::Confirm => {
                state.cancelled.insert(line.id);
            }
            LinePhase::Start | LinePhase::Revert => {}
        }
        Ok(())
    }
}

#[async_trait]
impl LocationGateway for InMemoryLocationGateway {
    async fn check_stock(
        &self,
        location: &OrderLocation,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, GatewayError> {
        let mut state = write(&self.state);
        state.stock_checks += 1;
        if state.failing_checks.contains(&location.id) {
            return Err(GatewayError::Transport {
                location: location.id,
                reason: "check unavailable".to_string(),
            });
        }
        let available = state
            .stock
            .get(&(location.id, product_id.clone()))
            .copied()
            .unwrap_or(0);
        Ok(available >= quantity)
    }

    async fn place_line(&self, line: &OrderLine, _items: &[OrderItem]) -> Result<(), GatewayError> {
        self.record(LinePhase::Place, line)
    }

    async fn start_cancel(&self, line: &OrderLine) -> Result<(), GatewayError> {
        self.record(LinePhase::Start, line)
    }

    async fn revert_cancel(&self, line: &OrderLine) -> Result<(), GatewayError> {
        self.record(LinePhase::Revert, line)
    }

    async fn confirm_cancel(&self, line: &OrderLine) -> Result<(), GatewayError> {
        self.record(LinePhase::Confirm, line)
    }
}
