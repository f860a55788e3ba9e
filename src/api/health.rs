//! Health check endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check response.
#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    identity_database: bool,
}

/// Readiness check: verifies the shared identity database opens.
async fn readiness_check(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let identity_database = state.registry.identity().await.is_ok();
    Json(ReadinessResponse {
        status: if identity_database { "ready" } else { "degraded" },
        identity_database,
    })
}
