//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Mounts `GET /health` for the named service.
pub fn router(service: &'static str) -> Router {
    Router::new()
        .route("/health", get(check))
        .with_state(service)
}

/// GET /health: liveness of the HTTP server itself.
async fn check(State(service): State<&'static str>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service,
    })
}
