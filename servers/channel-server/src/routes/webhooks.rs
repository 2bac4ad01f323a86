//! Inbound webhook endpoint.
//!
//! One endpoint accepts channel webhooks. The handler validates and
//! persists; all domain work happens in the background processor so the
//! channel gets its 200 within milliseconds.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use common::AppError;

use crate::services::webhook_processor::ReceiveOutcome;
use crate::state::AppState;

/// Receive a channel webhook.
///
/// Responds 200 with the stored event id (or `already_processed` for a
/// duplicate delivery), 400 on malformed or oversized payloads, 401 on a
/// bad shared secret.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/channel",
    tag = "Webhooks",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Event accepted or duplicate", body = ReceiveOutcome),
        (status = 400, description = "Malformed or oversized payload", body = common::ErrorResponse),
        (status = 401, description = "Invalid webhook token", body = common::ErrorResponse)
    )
)]
pub async fn receive_channel_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReceiveOutcome>, AppError> {
    let outcome = state.receiver.receive_booking(&body, &headers).await?;
    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/channel", post(receive_channel_webhook))
}
