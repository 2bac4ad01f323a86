//! Integration admin endpoints: connections, mappings, manual sync, outbox
//! retry and the unmatched-event queue.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use common::AppError;
use db::models::channel::{
    ChannelConnection, ConnectionStatus, CreateConnection, CreateMapping, ExternalMapping,
    IntegrationOutbox, NewOutboxEvent, OutboxEventType,
};
use db::models::webhook::UnmatchedWebhookEvent;
use integrations::{ChannexClient, ChannexClientConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Error as SqlxError;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::availability::DayAvailability;
use crate::services::pricing_engine::BookingQuote;
use crate::services::webhook_processor::PROVIDER;
use crate::state::AppState;

// ============================================
// Request / Response Types
// ============================================

/// Create a channel connection.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateConnectionRequest {
    pub project_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub api_key: String,
    #[validate(length(min = 1, max = 100))]
    pub external_property_id: String,
    pub external_group_id: Option<String>,
    /// Generated when omitted.
    pub webhook_secret: Option<String>,
}

/// Map a unit to a channel room type and rate plan.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateMappingRequest {
    pub unit_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub external_room_type_id: String,
    #[validate(length(min = 1, max = 100))]
    pub external_rate_plan_id: String,
}

/// Resolve an unmatched event, optionally linking a manually created booking.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveUnmatchedRequest {
    pub booking_id: Option<Uuid>,
}

/// Outcome of a manual sync trigger.
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncTriggered {
    pub connection_id: Uuid,
    pub events_enqueued: usize,
}

// ============================================
// Connections
// ============================================

/// Create a connection for a project.
#[utoipa::path(
    post,
    path = "/api/v1/integrations/connections",
    tag = "Integrations",
    request_body = CreateConnectionRequest,
    responses(
        (status = 200, description = "Connection created", body = ChannelConnection),
        (status = 409, description = "Project already has a connection", body = common::ErrorResponse)
    )
)]
pub async fn create_connection(
    State(state): State<AppState>,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<Json<ChannelConnection>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let connection = state
        .connection_repo
        .create(
            CreateConnection {
                project_id: request.project_id,
                api_key: request.api_key,
                external_property_id: request.external_property_id,
                external_group_id: request.external_group_id,
                webhook_secret: request.webhook_secret,
            },
            PROVIDER,
        )
        .await
        .map_err(conflict_or_db)?;

    Ok(Json(connection))
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/connections",
    tag = "Integrations",
    responses((status = 200, description = "All connections", body = [ChannelConnection]))
)]
pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChannelConnection>>, AppError> {
    Ok(Json(state.connection_repo.list_all().await.map_err(db_err)?))
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/connections/{id}",
    tag = "Integrations",
    responses(
        (status = 200, description = "Connection", body = ChannelConnection),
        (status = 404, description = "Not found", body = common::ErrorResponse)
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChannelConnection>, AppError> {
    let connection = state
        .connection_repo
        .find_by_id(id)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))?;
    Ok(Json(connection))
}

/// Activate a pending connection.
#[utoipa::path(
    post,
    path = "/api/v1/integrations/connections/{id}/activate",
    tag = "Integrations",
    responses((status = 200, description = "Connection activated", body = ChannelConnection))
)]
pub async fn activate_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChannelConnection>, AppError> {
    let connection = state
        .connection_repo
        .set_status(id, ConnectionStatus::Active)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))?;
    Ok(Json(connection))
}

#[utoipa::path(
    delete,
    path = "/api/v1/integrations/connections/{id}",
    tag = "Integrations",
    responses((status = 200, description = "Connection soft-deleted"))
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.connection_repo.soft_delete(id).await.map_err(db_err)?;
    if !deleted {
        return Err(AppError::NotFound(format!("connection {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Room types and rate plans as the channel sees them, to assist mapping.
#[utoipa::path(
    get,
    path = "/api/v1/integrations/connections/{id}/rooms",
    tag = "Integrations",
    responses((status = 200, description = "Channel room types and rate plans"))
)]
pub async fn channel_rooms(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let connection = state
        .connection_repo
        .find_by_id(id)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))?;
    let property_id = connection
        .external_property_id
        .clone()
        .ok_or_else(|| AppError::BadRequest("connection has no property id".to_string()))?;

    let client = ChannexClient::new(
        ChannexClientConfig {
            base_url: state.settings.channel_base_url.clone(),
            api_key: connection.api_key.clone(),
            external_property_id: property_id,
            connection_id: Some(connection.id),
            request_id: Uuid::new_v4().to_string(),
            timeout: Duration::from_secs(state.settings.http_timeout_secs),
        },
        Some(state.rate_state_repo.clone()),
        Some(state.integration_log_repo.clone()),
    )
    .map_err(|e| AppError::ExternalService(e.to_string()))?;

    let room_types = client
        .get_room_types(None)
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;
    let rate_plans = client
        .get_rate_plans(None)
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "room_types": room_types,
        "rate_plans": rate_plans,
    })))
}

// ============================================
// Mappings
// ============================================

#[utoipa::path(
    post,
    path = "/api/v1/integrations/connections/{id}/mappings",
    tag = "Integrations",
    request_body = CreateMappingRequest,
    responses((status = 200, description = "Mapping created or updated", body = ExternalMapping))
)]
pub async fn create_mapping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateMappingRequest>,
) -> Result<Json<ExternalMapping>, AppError> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    state
        .connection_repo
        .find_by_id(id)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))?;

    let mapping = state
        .mapping_repo
        .upsert(CreateMapping {
            connection_id: id,
            unit_id: request.unit_id,
            external_room_type_id: request.external_room_type_id,
            external_rate_plan_id: request.external_rate_plan_id,
        })
        .await
        .map_err(db_err)?;
    Ok(Json(mapping))
}

#[utoipa::path(
    get,
    path = "/api/v1/integrations/connections/{id}/mappings",
    tag = "Integrations",
    responses((status = 200, description = "Mappings for the connection", body = [ExternalMapping]))
)]
pub async fn list_mappings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ExternalMapping>>, AppError> {
    Ok(Json(
        state
            .mapping_repo
            .list_for_connection(id)
            .await
            .map_err(db_err)?,
    ))
}

/// Enqueue a full sync (prices + availability) for every mapped unit.
#[utoipa::path(
    post,
    path = "/api/v1/integrations/connections/{id}/sync",
    tag = "Integrations",
    responses((status = 200, description = "Sync events enqueued", body = SyncTriggered))
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncTriggered>, AppError> {
    let connection = state
        .connection_repo
        .find_by_id(id)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))?;
    if !connection.is_active() {
        return Err(AppError::Conflict("connection is not active".to_string()));
    }

    let mappings = state
        .mapping_repo
        .list_for_connection(id)
        .await
        .map_err(db_err)?;

    let mut events_enqueued = 0;
    for mapping in mappings.into_iter().filter(|m| m.is_active) {
        let enqueued = state
            .outbox_repo
            .enqueue(NewOutboxEvent {
                connection_id: id,
                event_type: OutboxEventType::FullSync,
                unit_id: mapping.unit_id,
                days_ahead: state.settings.sync_days,
                idempotency_key: None,
            })
            .await
            .map_err(db_err)?;
        if enqueued.is_some() {
            events_enqueued += 1;
        }
    }

    Ok(Json(SyncTriggered {
        connection_id: id,
        events_enqueued,
    }))
}

// ============================================
// Outbox
// ============================================

#[utoipa::path(
    get,
    path = "/api/v1/integrations/outbox/failed",
    tag = "Integrations",
    responses((status = 200, description = "Permanently failed outbox events", body = [IntegrationOutbox]))
)]
pub async fn list_failed_outbox(
    State(state): State<AppState>,
) -> Result<Json<Vec<IntegrationOutbox>>, AppError> {
    Ok(Json(
        state.outbox_repo.list_failed(100).await.map_err(db_err)?,
    ))
}

/// Reset a permanently failed event for another round of attempts.
#[utoipa::path(
    post,
    path = "/api/v1/integrations/outbox/{id}/retry",
    tag = "Integrations",
    responses(
        (status = 200, description = "Event re-queued", body = IntegrationOutbox),
        (status = 404, description = "No failed event with this id", body = common::ErrorResponse)
    )
)]
pub async fn retry_outbox_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IntegrationOutbox>, AppError> {
    let event = state
        .outbox_repo
        .retry_failed(id)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("failed outbox event {}", id)))?;
    Ok(Json(event))
}

// ============================================
// Unmatched Events
// ============================================

#[utoipa::path(
    get,
    path = "/api/v1/integrations/unmatched",
    tag = "Integrations",
    responses((status = 200, description = "Pending unmatched webhook events", body = [UnmatchedWebhookEvent]))
)]
pub async fn list_unmatched(
    State(state): State<AppState>,
) -> Result<Json<Vec<UnmatchedWebhookEvent>>, AppError> {
    Ok(Json(
        state.unmatched_repo.list_pending(100).await.map_err(db_err)?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/integrations/unmatched/{id}/resolve",
    tag = "Integrations",
    request_body = ResolveUnmatchedRequest,
    responses((status = 200, description = "Event resolved", body = UnmatchedWebhookEvent))
)]
pub async fn resolve_unmatched(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveUnmatchedRequest>,
) -> Result<Json<UnmatchedWebhookEvent>, AppError> {
    let event = state
        .unmatched_repo
        .resolve(id, request.booking_id, None)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("pending unmatched event {}", id)))?;
    Ok(Json(event))
}

#[utoipa::path(
    post,
    path = "/api/v1/integrations/unmatched/{id}/ignore",
    tag = "Integrations",
    responses((status = 200, description = "Event ignored", body = UnmatchedWebhookEvent))
)]
pub async fn ignore_unmatched(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UnmatchedWebhookEvent>, AppError> {
    let event = state
        .unmatched_repo
        .ignore(id, None)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("pending unmatched event {}", id)))?;
    Ok(Json(event))
}

// ============================================
// Pricing & Availability
// ============================================

/// Stay dates for a quote. Check-out is exclusive.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct QuoteQuery {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

/// Quote a stay with the currently active intraday discount. The discount
/// applies only to the current local date; future nights use the full day
/// price.
#[utoipa::path(
    get,
    path = "/api/v1/integrations/pricing/{unit_id}/quote",
    tag = "Integrations",
    params(QuoteQuery),
    responses(
        (status = 200, description = "Stay quote with per-night breakdown", body = BookingQuote),
        (status = 404, description = "Unit has no pricing policy", body = common::ErrorResponse)
    )
)]
pub async fn pricing_quote(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<BookingQuote>, AppError> {
    if query.check_out <= query.check_in {
        return Err(AppError::BadRequest(
            "check_out must be after check_in".to_string(),
        ));
    }

    let quote = state
        .pricing
        .booking_total(unit_id, query.check_in, query.check_out)
        .await
        .map_err(db_err)?
        .ok_or_else(|| AppError::NotFound(format!("no pricing policy for unit {}", unit_id)))?;
    Ok(Json(quote))
}

/// Horizon for an availability projection.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct HorizonQuery {
    /// Days ahead; defaults to the configured sync horizon.
    pub days: Option<i64>,
}

/// Project per-date availability for a unit.
#[utoipa::path(
    get,
    path = "/api/v1/integrations/availability/{unit_id}",
    tag = "Integrations",
    params(HorizonQuery),
    responses(
        (status = 200, description = "Availability projection", body = [DayAvailability]),
        (status = 404, description = "Unit not found", body = common::ErrorResponse)
    )
)]
pub async fn unit_availability(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
    Query(query): Query<HorizonQuery>,
) -> Result<Json<Vec<DayAvailability>>, AppError> {
    let days = query.days.unwrap_or(state.settings.sync_days).clamp(1, 730);
    let projection = state
        .availability
        .project_unit(unit_id, days)
        .await
        .map_err(|e| match e {
            crate::services::availability::ProjectionError::UnitNotFound => {
                AppError::NotFound(format!("unit {}", unit_id))
            }
            crate::services::availability::ProjectionError::Database(e) => {
                AppError::Database(e.to_string())
            }
        })?;
    Ok(Json(projection))
}

// ============================================
// Router
// ============================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connections", post(create_connection).get(list_connections))
        .route(
            "/connections/:id",
            get(get_connection).delete(delete_connection),
        )
        .route("/connections/:id/activate", post(activate_connection))
        .route("/connections/:id/rooms", get(channel_rooms))
        .route(
            "/connections/:id/mappings",
            post(create_mapping).get(list_mappings),
        )
        .route("/connections/:id/sync", post(trigger_sync))
        .route("/pricing/:unit_id/quote", get(pricing_quote))
        .route("/availability/:unit_id", get(unit_availability))
        .route("/outbox/failed", get(list_failed_outbox))
        .route("/outbox/:id/retry", post(retry_outbox_event))
        .route("/unmatched", get(list_unmatched))
        .route("/unmatched/:id/resolve", post(resolve_unmatched))
        .route("/unmatched/:id/ignore", post(ignore_unmatched))
}

fn db_err(e: SqlxError) -> AppError {
    AppError::Database(e.to_string())
}

/// Unique violations surface as 409, everything else as a database error.
fn conflict_or_db(e: SqlxError) -> AppError {
    if let SqlxError::Database(db) = &e {
        if db.is_unique_violation() {
            return AppError::Conflict(
                "this project already has a connection for the provider".to_string(),
            );
        }
    }
    AppError::Database(e.to_string())
}
