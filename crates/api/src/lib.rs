//! HTTP API server for multi-location order orchestration.
//!
//! Exposes order placement, cancellation and location-reported state
//! updates over REST, with structured logging (tracing) and Prometheus
//! metrics. The binary also runs the location registry refresh and the
//! reconciliation loops.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use saga::LocationGateway;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + 'static,
    G: LocationGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, G>))
        .route("/orders", post(routes::orders::place::<S, G>))
        .route("/orders/{id}", get(routes::orders::get::<S, G>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S, G>))
        .route(
            "/orders/{id}/lines/{line_id}/state",
            put(routes::orders::update_line_state::<S, G>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
