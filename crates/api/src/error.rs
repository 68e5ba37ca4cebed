//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::{FulfillmentError, INSUFFICIENT_STOCK_MESSAGE};
use ledger::LedgerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Fulfillment logic error.
    Fulfillment(FulfillmentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
        };

        metrics::counter!("http_errors_total", "status" => status.as_u16().to_string())
            .increment(1);
        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    match err {
        FulfillmentError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        FulfillmentError::InsufficientStock { .. } => (
            StatusCode::BAD_REQUEST,
            INSUFFICIENT_STOCK_MESSAGE.to_string(),
        ),
        FulfillmentError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        FulfillmentError::TransientInfrastructure(msg) => {
            tracing::warn!(error = %msg, "transient infrastructure failure");
            (StatusCode::SERVICE_UNAVAILABLE, msg)
        }
        FulfillmentError::Ledger(LedgerError::OrderNotFound(id)) => {
            (StatusCode::NOT_FOUND, format!("Order {id} not found"))
        }
        err => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
