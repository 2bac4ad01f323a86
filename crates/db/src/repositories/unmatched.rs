//! Unmatched webhook event repository (quarantine).
//!
//! Unroutable or invalid payloads are parked here for manual resolution,
//! never dropped.

use crate::models::webhook::{NewUnmatchedEvent, UnmatchedWebhookEvent};
use crate::DbPool;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Repository for the unmatched-event quarantine.
#[derive(Clone)]
pub struct UnmatchedEventRepository {
    pool: DbPool,
}

impl UnmatchedEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(
        &self,
        provider: &str,
        event: NewUnmatchedEvent,
    ) -> Result<UnmatchedWebhookEvent, SqlxError> {
        let saved = sqlx::query_as::<_, UnmatchedWebhookEvent>(
            r#"
            INSERT INTO unmatched_webhook_events (
                provider, event_type, external_reservation_id, property_id,
                room_type_id, rate_plan_id, raw_payload, reason, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING *
            "#,
        )
        .bind(provider)
        .bind(&event.event_type)
        .bind(&event.external_reservation_id)
        .bind(&event.property_id)
        .bind(&event.room_type_id)
        .bind(&event.rate_plan_id)
        .bind(&event.raw_payload)
        .bind(event.reason.to_string())
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            unmatched_id = %saved.id,
            reason = %saved.reason,
            "quarantined webhook event"
        );
        Ok(saved)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UnmatchedWebhookEvent>, SqlxError> {
        sqlx::query_as::<_, UnmatchedWebhookEvent>(
            "SELECT * FROM unmatched_webhook_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_pending(&self, limit: i64) -> Result<Vec<UnmatchedWebhookEvent>, SqlxError> {
        sqlx::query_as::<_, UnmatchedWebhookEvent>(
            r#"
            SELECT * FROM unmatched_webhook_events
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Mark an event resolved, linking the booking an operator created for it.
    pub async fn resolve(
        &self,
        id: Uuid,
        booking_id: Option<Uuid>,
        resolved_by: Option<Uuid>,
    ) -> Result<Option<UnmatchedWebhookEvent>, SqlxError> {
        sqlx::query_as::<_, UnmatchedWebhookEvent>(
            r#"
            UPDATE unmatched_webhook_events
            SET status = 'resolved', resolved_booking_id = $2, resolved_by_id = $3,
                resolved_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(booking_id)
        .bind(resolved_by)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn ignore(
        &self,
        id: Uuid,
        resolved_by: Option<Uuid>,
    ) -> Result<Option<UnmatchedWebhookEvent>, SqlxError> {
        sqlx::query_as::<_, UnmatchedWebhookEvent>(
            r#"
            UPDATE unmatched_webhook_events
            SET status = 'ignored', resolved_by_id = $2, resolved_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(resolved_by)
        .fetch_optional(&self.pool)
        .await
    }
}
