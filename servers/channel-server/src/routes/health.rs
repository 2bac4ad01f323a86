//! Health endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::health_check::HealthReport;
use crate::state::AppState;

/// Basic liveness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Detailed channel integration health report.
#[utoipa::path(
    get,
    path = "/health/integration",
    tag = "Health",
    responses((status = 200, description = "Integration health report", body = HealthReport))
)]
pub async fn integration_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.report().await)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/integration", get(integration_health))
}
