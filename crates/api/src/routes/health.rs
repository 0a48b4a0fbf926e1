//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::OrderStore;
use saga::LocationGateway;
use serde::Serialize;

use super::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub locations: usize,
}

/// GET /health: liveness plus the size of the current location snapshot.
pub async fn check<S, G>(State(state): State<Arc<AppState<S, G>>>) -> Json<HealthResponse>
where
    S: OrderStore + 'static,
    G: LocationGateway + 'static,
{
    Json(HealthResponse {
        status: "ok",
        locations: state.registry.snapshot().len(),
    })
}
