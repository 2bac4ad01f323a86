//! Channel server library.
//!
//! Exposes the application components for integration testing.

pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the application router with all routes.
///
/// Exposed for integration testing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/webhooks", routes::webhooks::router())
        .nest("/api/v1/integrations", routes::integrations::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
