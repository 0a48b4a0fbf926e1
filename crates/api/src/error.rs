//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path or body.
    BadRequest(String),
    /// Orchestration error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg })),
            ApiError::Saga(err) => saga_error_to_response(err),
        };
        metrics::counter!("api_error_responses_total", "status" => status.as_str().to_string())
            .increment(1);
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, serde_json::Value) {
    let message = err.to_string();
    match &err {
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": message })),
        SagaError::UnavailableItems(products) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": message, "unavailable": products }),
        ),
        SagaError::Conflict(_) => (StatusCode::CONFLICT, serde_json::json!({ "error": message })),
        SagaError::InvalidRequest(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "error": message }),
        ),
        SagaError::RemoteUnavailable { .. } => {
            tracing::warn!(error = %message, "location unavailable");
            (StatusCode::BAD_GATEWAY, serde_json::json!({ "error": message }))
        }
        SagaError::CancelPending(lines) => (
            StatusCode::ACCEPTED,
            serde_json::json!({ "status": "cancel_pending", "unconfirmedLines": lines }),
        ),
        SagaError::PartialCommit { .. } => {
            let manual = err.requires_manual_intervention();
            if manual {
                tracing::error!(error = %message, "request left state needing manual intervention");
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": message, "requiresManualIntervention": manual }),
            )
        }
        SagaError::Persistence(_) => {
            tracing::error!(error = %message, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": message }),
            )
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
