//! Outbox worker.
//!
//! Polls the integration outbox, merges overlapping events last-write-wins,
//! and pushes prices/availability to the channel under the per-property rate
//! gate. Failures reschedule with exponential backoff; a paused property
//! postpones its events without burning attempts on HTTP calls.

use chrono::{Duration as ChronoDuration, Utc};
use common::ChannelSettings;
use db::models::channel::{
    AuditDirection, AuditEntityType, ChannelConnection, IntegrationOutbox, NewIntegrationAudit,
    NewOutboxEvent, OutboxEventType,
};
use db::repositories::{
    AuditRepository, ConnectionRepository, IntegrationLogRepository, MappingRepository,
    OutboxRepository, RateStateRepository,
};
use db::DbPool;
use integrations::{
    canonical_payload_hash, format_rate, ChannexClient, ChannexClientConfig, ChannexError,
};
use serde_json::{json, Value};
use sqlx::Error as SqlxError;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use super::availability::AvailabilityProjector;
use super::batch_builder::{build_availability_values, build_rate_values, split_values};
use super::pricing_engine::PricingEngine;

/// Rows left in `processing` longer than this are treated as abandoned by a
/// dead worker.
const STUCK_PROCESSING_SECS: i64 = 600;

/// Why an event execution did not complete.
enum ExecError {
    /// The property is paused; reschedule without judgement.
    Paused { remaining_secs: i64 },
    /// Channel API failure; retryability decided by the error.
    Channel(ChannexError),
    /// Bad event data; fails terminally.
    Invalid(String),
    Database(SqlxError),
}

impl From<SqlxError> for ExecError {
    fn from(e: SqlxError) -> Self {
        ExecError::Database(e)
    }
}

/// Outbox worker: one instance per process; replicas cooperate through
/// `FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct OutboxWorker {
    settings: ChannelSettings,
    outbox: OutboxRepository,
    connections: ConnectionRepository,
    mappings: MappingRepository,
    rate_states: RateStateRepository,
    logs: IntegrationLogRepository,
    audit: AuditRepository,
    pricing: PricingEngine,
    availability: AvailabilityProjector,
}

impl OutboxWorker {
    pub fn new(pool: DbPool, settings: ChannelSettings) -> Self {
        Self {
            outbox: OutboxRepository::new(pool.clone()),
            connections: ConnectionRepository::new(pool.clone()),
            mappings: MappingRepository::new(pool.clone()),
            rate_states: RateStateRepository::new(pool.clone()),
            logs: IntegrationLogRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            pricing: PricingEngine::new(db::repositories::PricingPolicyRepository::new(
                pool.clone(),
            )),
            availability: AvailabilityProjector::new(
                db::repositories::UnitRepository::new(pool.clone()),
                db::repositories::BookingRepository::new(pool),
            ),
            settings,
        }
    }

    /// Poll loop. Checks the shutdown signal between units of work; an
    /// in-flight HTTP request finishes within its own timeout.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(recovered) = self.outbox.recover_stuck(STUCK_PROCESSING_SECS).await {
            if recovered > 0 {
                tracing::warn!(recovered, "reverted interrupted outbox events to retrying");
            }
        }

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.worker_poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (succeeded, failed) = self.run_once().await;
                    if succeeded + failed > 0 {
                        tracing::debug!(succeeded, failed, "outbox tick complete");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("outbox worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim, merge and execute one batch. Returns (succeeded, failed).
    pub async fn run_once(&self) -> (usize, usize) {
        let events = match self
            .outbox
            .claim_batch(self.settings.worker_batch_size, self.settings.worker_skip_locked)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("failed to claim outbox events: {}", e);
                return (0, 0);
            }
        };

        let mut succeeded = 0;
        let mut failed = 0;
        for event in events {
            match self.execute_event(&event).await {
                Ok(response_data) => {
                    if self
                        .outbox
                        .mark_completed(event.id, response_data)
                        .await
                        .is_ok()
                    {
                        let _ = self.connections.record_sync_success(event.connection_id).await;
                        succeeded += 1;
                    }
                }
                Err(ExecError::Paused { remaining_secs }) => {
                    tracing::info!(
                        event_id = %event.id,
                        remaining_secs,
                        "property rate-limited, rescheduling event"
                    );
                    let _ = self
                        .outbox
                        .mark_retrying(
                            event.id,
                            Utc::now() + ChronoDuration::seconds(60),
                            "property rate-limited",
                        )
                        .await;
                    failed += 1;
                }
                Err(ExecError::Channel(e)) => {
                    let _ = self
                        .connections
                        .record_sync_error(event.connection_id, &e.to_string(), e.is_auth_error())
                        .await;
                    self.handle_failure(&event, &e.to_string(), e.retryable()).await;
                    failed += 1;
                }
                Err(ExecError::Invalid(message)) => {
                    self.handle_failure(&event, &message, false).await;
                    failed += 1;
                }
                Err(ExecError::Database(e)) => {
                    self.handle_failure(&event, &e.to_string(), true).await;
                    failed += 1;
                }
            }
        }
        (succeeded, failed)
    }

    /// Reschedule with exponential backoff or fail terminally.
    async fn handle_failure(&self, event: &IntegrationOutbox, error: &str, retryable: bool) {
        if !retryable || event.attempts >= event.max_attempts {
            tracing::error!(
                event_id = %event.id,
                attempts = event.attempts,
                "outbox event permanently failed: {}",
                error
            );
            let _ = self.outbox.mark_failed(event.id, error).await;
            return;
        }

        // 1, 2, 4, 8, 16 minutes, capped at 60
        let exp = (event.attempts - 1).clamp(0, 30) as u32;
        let delay_minutes = (1i64 << exp).min(60);
        let next_attempt = Utc::now() + ChronoDuration::minutes(delay_minutes);
        tracing::warn!(
            event_id = %event.id,
            attempts = event.attempts,
            delay_minutes,
            "outbox event failed, will retry: {}",
            error
        );
        let _ = self.outbox.mark_retrying(event.id, next_attempt, error).await;
    }

    async fn execute_event(&self, event: &IntegrationOutbox) -> Result<Option<Value>, ExecError> {
        let event_type = OutboxEventType::from_str(&event.event_type)
            .map_err(ExecError::Invalid)?;

        let connection = self
            .connections
            .find_by_id(event.connection_id)
            .await?
            .ok_or_else(|| ExecError::Invalid(format!("connection {} not found", event.connection_id)))?;

        if !connection.is_active() {
            return Err(ExecError::Invalid(format!(
                "connection is not active: {}",
                connection.status
            )));
        }

        let property_id = connection
            .external_property_id
            .clone()
            .ok_or_else(|| ExecError::Invalid("connection has no external property id".to_string()))?;

        // A paused property postpones its events before any HTTP work
        if let Some(remaining_secs) = self
            .rate_states
            .pause_remaining_secs(&property_id)
            .await?
        {
            return Err(ExecError::Paused { remaining_secs });
        }

        let unit_id = event
            .unit_id
            .or_else(|| {
                event
                    .payload
                    .get("unit_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .ok_or_else(|| ExecError::Invalid("event carries no unit_id".to_string()))?;
        let days_ahead = event
            .payload
            .get("days_ahead")
            .and_then(|v| v.as_i64())
            .unwrap_or(self.settings.sync_days);

        let client = self.build_client(&connection, &property_id, event.id)?;

        match event_type {
            OutboxEventType::PriceUpdate => {
                self.push_prices(event, &connection, &client, unit_id, days_ahead)
                    .await
            }
            OutboxEventType::AvailUpdate => {
                self.push_availability(event, &connection, &client, unit_id, days_ahead)
                    .await
            }
            OutboxEventType::FullSync => self.expand_full_sync(event, unit_id).await,
        }
    }

    fn build_client(
        &self,
        connection: &ChannelConnection,
        property_id: &str,
        event_id: Uuid,
    ) -> Result<ChannexClient, ExecError> {
        ChannexClient::new(
            ChannexClientConfig {
                base_url: self.settings.channel_base_url.clone(),
                api_key: connection.api_key.clone(),
                external_property_id: property_id.to_string(),
                connection_id: Some(connection.id),
                request_id: event_id.to_string(),
                timeout: Duration::from_secs(self.settings.http_timeout_secs),
            },
            Some(self.rate_states.clone()),
            Some(self.logs.clone()),
        )
        .map_err(ExecError::Channel)
    }

    /// Push the price calendar for a unit to the channel's restrictions
    /// endpoint, chunked under the payload cap.
    async fn push_prices(
        &self,
        event: &IntegrationOutbox,
        connection: &ChannelConnection,
        client: &ChannexClient,
        unit_id: Uuid,
        days_ahead: i64,
    ) -> Result<Option<Value>, ExecError> {
        let mapping = self
            .mappings
            .find_active_by_unit(connection.id, unit_id)
            .await?
            .filter(|m| m.external_rate_plan_id.is_some())
            .ok_or_else(|| {
                ExecError::Invalid(format!("no active rate-plan mapping for unit {}", unit_id))
            })?;
        let rate_plan_id = mapping.external_rate_plan_id.clone().unwrap_or_default();
        let property_id = client_property(connection);

        let prices = self
            .pricing
            .prices_for_channel_push(unit_id, days_ahead)
            .await?;
        if prices.is_empty() {
            // No pricing policy yet; nothing to push, not an error
            tracing::info!(unit_id = %unit_id, "no pricing policy, skipping price push");
            return Ok(Some(json!({ "pushed_days": 0 })));
        }

        let rates: Vec<(chrono::NaiveDate, String)> = prices
            .iter()
            .map(|(date, rate)| (*date, format_rate(*rate)))
            .collect();
        let values = build_rate_values(&property_id, &rate_plan_id, &rates);
        let payload_hash = canonical_payload_hash(&json!({ "values": values }));
        let chunks = split_values(values, self.settings.max_payload_bytes);
        let chunk_count = chunks.len();
        let started = std::time::Instant::now();

        for chunk in chunks {
            client
                .post_restrictions(chunk)
                .await
                .map_err(ExecError::Channel)?;
        }

        self.mappings.touch_price_sync(mapping.id).await?;

        self.record_audit(
            connection.id,
            AuditEntityType::Rate,
            unit_id,
            payload_hash,
            prices.len() as i32,
            prices.first().map(|(d, _)| *d),
            prices.last().map(|(d, _)| *d),
            event,
            started.elapsed().as_millis() as i32,
        )
        .await;

        tracing::info!(
            unit_id = %unit_id,
            days = prices.len(),
            chunks = chunk_count,
            "pushed prices to channel"
        );
        Ok(Some(json!({ "pushed_days": prices.len() })))
    }

    /// Push the availability projection for a unit.
    async fn push_availability(
        &self,
        event: &IntegrationOutbox,
        connection: &ChannelConnection,
        client: &ChannexClient,
        unit_id: Uuid,
        days_ahead: i64,
    ) -> Result<Option<Value>, ExecError> {
        let mapping = self
            .mappings
            .find_active_by_unit(connection.id, unit_id)
            .await?
            .filter(|m| m.external_room_type_id.is_some())
            .ok_or_else(|| {
                ExecError::Invalid(format!("no active room-type mapping for unit {}", unit_id))
            })?;
        let room_type_id = mapping.external_room_type_id.clone().unwrap_or_default();
        let property_id = client_property(connection);

        let projection = self
            .availability
            .project_unit(unit_id, days_ahead)
            .await
            .map_err(|e| match e {
                super::availability::ProjectionError::UnitNotFound => {
                    ExecError::Invalid(format!("unit {} not found", unit_id))
                }
                super::availability::ProjectionError::Database(e) => ExecError::Database(e),
            })?;

        let days: Vec<(chrono::NaiveDate, i32)> = projection
            .iter()
            .map(|d| (d.date, d.availability))
            .collect();
        let values = build_availability_values(&property_id, &room_type_id, &days);
        let payload_hash = canonical_payload_hash(&json!({ "values": values }));
        let chunks = split_values(values, self.settings.max_payload_bytes);
        let started = std::time::Instant::now();

        for chunk in chunks {
            client
                .post_availability(chunk)
                .await
                .map_err(ExecError::Channel)?;
        }

        self.mappings.touch_avail_sync(mapping.id).await?;

        self.record_audit(
            connection.id,
            AuditEntityType::Availability,
            unit_id,
            payload_hash,
            days.len() as i32,
            days.first().map(|(d, _)| *d),
            days.last().map(|(d, _)| *d),
            event,
            started.elapsed().as_millis() as i32,
        )
        .await;

        tracing::info!(unit_id = %unit_id, days = days.len(), "pushed availability to channel");
        Ok(Some(json!({ "pushed_days": days.len() })))
    }

    /// A full sync fans out into a price and an availability event for the
    /// unit and completes itself.
    async fn expand_full_sync(
        &self,
        event: &IntegrationOutbox,
        unit_id: Uuid,
    ) -> Result<Option<Value>, ExecError> {
        for (event_type, label) in [
            (OutboxEventType::PriceUpdate, "price"),
            (OutboxEventType::AvailUpdate, "avail"),
        ] {
            self.outbox
                .enqueue(NewOutboxEvent {
                    connection_id: event.connection_id,
                    event_type,
                    unit_id,
                    days_ahead: self.settings.sync_days,
                    idempotency_key: Some(format!("full_sync_{}_{}", label, event.id)),
                })
                .await?;
        }

        self.record_audit_simple(event.connection_id, AuditEntityType::FullSync, unit_id, event)
            .await;
        Ok(Some(json!({ "expanded": true })))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_audit(
        &self,
        connection_id: Uuid,
        entity_type: AuditEntityType,
        unit_id: Uuid,
        payload_hash: String,
        records_count: i32,
        date_from: Option<chrono::NaiveDate>,
        date_to: Option<chrono::NaiveDate>,
        event: &IntegrationOutbox,
        duration_ms: i32,
    ) {
        let audit = NewIntegrationAudit {
            connection_id: Some(connection_id),
            direction: AuditDirection::Outbound,
            entity_type,
            external_id: None,
            unit_id: Some(unit_id),
            payload_hash: Some(payload_hash),
            payload_size_bytes: None,
            date_from,
            date_to,
            records_count: Some(records_count),
            status: "success".to_string(),
            error_message: None,
            retry_count: event.attempts - 1,
            duration_ms: Some(duration_ms),
            request_id: Some(event.id.to_string()),
        };
        if let Err(e) = self.audit.record(audit).await {
            tracing::warn!("failed to write outbound audit row: {}", e);
        }
    }

    async fn record_audit_simple(
        &self,
        connection_id: Uuid,
        entity_type: AuditEntityType,
        unit_id: Uuid,
        event: &IntegrationOutbox,
    ) {
        let audit = NewIntegrationAudit {
            connection_id: Some(connection_id),
            direction: AuditDirection::Outbound,
            entity_type,
            external_id: None,
            unit_id: Some(unit_id),
            payload_hash: None,
            payload_size_bytes: None,
            date_from: None,
            date_to: None,
            records_count: None,
            status: "success".to_string(),
            error_message: None,
            retry_count: event.attempts - 1,
            duration_ms: None,
            request_id: Some(event.id.to_string()),
        };
        if let Err(e) = self.audit.record(audit).await {
            tracing::warn!("failed to write outbound audit row: {}", e);
        }
    }
}

fn client_property(connection: &ChannelConnection) -> String {
    connection.external_property_id.clone().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_backoff_schedule() {
        // 1, 2, 4, 8, 16 minutes, capped at 60
        let delays: Vec<i64> = (1..=7)
            .map(|attempts: i32| {
                let exp = (attempts - 1).clamp(0, 30) as u32;
                (1i64 << exp).min(60)
            })
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60]);
    }
}
