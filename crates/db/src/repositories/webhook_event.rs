//! Webhook event log repository.
//!
//! The receiver inserts raw events; the processor claims them oldest-first
//! with `FOR UPDATE SKIP LOCKED`.

use crate::models::webhook::WebhookEventLog;
use crate::DbPool;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Fields captured at receive time.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub provider: String,
    pub endpoint_type: Option<String>,
    pub property_id: Option<String>,
    pub event_id: Option<String>,
    pub event_type: String,
    pub external_id: Option<String>,
    pub revision_id: Option<String>,
    pub payload_json: String,
    pub payload_hash: String,
    pub request_headers: Option<String>,
}

/// Inbound queue depth per status, for health reporting.
#[derive(Debug, Clone, Default, serde::Serialize, utoipa::ToSchema)]
pub struct WebhookCounts {
    pub received: i64,
    pub processing: i64,
    pub processed: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Repository for webhook event log operations.
#[derive(Clone)]
pub struct WebhookEventRepository {
    pool: DbPool,
}

impl WebhookEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Receive-time dedup: an event with the same provider event id already
    /// processing or processed.
    pub async fn find_duplicate_by_event_id(
        &self,
        provider: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEventLog>, SqlxError> {
        sqlx::query_as::<_, WebhookEventLog>(
            r#"
            SELECT * FROM webhook_event_logs
            WHERE provider = $1 AND event_id = $2
              AND status IN ('processing', 'processed')
            LIMIT 1
            "#,
        )
        .bind(provider)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Receive-time dedup fallback: the same payload hash in a non-terminal
    /// state.
    pub async fn find_duplicate_by_hash(
        &self,
        provider: &str,
        payload_hash: &str,
    ) -> Result<Option<WebhookEventLog>, SqlxError> {
        sqlx::query_as::<_, WebhookEventLog>(
            r#"
            SELECT * FROM webhook_event_logs
            WHERE provider = $1 AND payload_hash = $2
              AND status IN ('received', 'processing', 'processed')
            LIMIT 1
            "#,
        )
        .bind(provider)
        .bind(payload_hash)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn insert(&self, event: NewWebhookEvent) -> Result<WebhookEventLog, SqlxError> {
        sqlx::query_as::<_, WebhookEventLog>(
            r#"
            INSERT INTO webhook_event_logs (
                provider, endpoint_type, property_id, event_id, event_type,
                external_id, revision_id, payload_json, payload_hash,
                request_headers, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'received')
            RETURNING *
            "#,
        )
        .bind(&event.provider)
        .bind(&event.endpoint_type)
        .bind(&event.property_id)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.external_id)
        .bind(&event.revision_id)
        .bind(&event.payload_json)
        .bind(&event.payload_hash)
        .bind(&event.request_headers)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<WebhookEventLog>, SqlxError> {
        sqlx::query_as::<_, WebhookEventLog>("SELECT * FROM webhook_event_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Claim received events for processing, oldest first. Marks the claimed
    /// rows `processing` inside the locking transaction.
    pub async fn claim_received(
        &self,
        limit: i64,
        skip_locked: bool,
    ) -> Result<Vec<WebhookEventLog>, SqlxError> {
        let mut tx = self.pool.begin().await?;

        let lock_clause = if skip_locked {
            "FOR UPDATE SKIP LOCKED"
        } else {
            "FOR UPDATE"
        };
        let query = format!(
            r#"
            SELECT * FROM webhook_event_logs
            WHERE status = 'received'
            ORDER BY received_at
            LIMIT $1
            {}
            "#,
            lock_clause
        );

        let events = sqlx::query_as::<_, WebhookEventLog>(&query)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let claimed = if ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as::<_, WebhookEventLog>(
                r#"
                UPDATE webhook_event_logs
                SET status = 'processing'
                WHERE id = ANY($1)
                RETURNING *
                "#,
            )
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?
        };

        tx.commit().await?;

        let mut claimed = claimed;
        claimed.sort_by_key(|e| e.received_at);
        Ok(claimed)
    }

    pub async fn mark_processed(
        &self,
        id: Uuid,
        result_action: &str,
        result_booking_id: Option<Uuid>,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE webhook_event_logs
            SET status = 'processed', result_action = $2, result_booking_id = $3,
                processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result_action)
        .bind(result_booking_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(&self, id: Uuid, result_action: &str) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE webhook_event_logs
            SET status = 'skipped', result_action = $2, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result_action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE webhook_event_logs
            SET status = 'failed', error_message = LEFT($2, 1000), processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn status_counts(&self) -> Result<WebhookCounts, SqlxError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM webhook_event_logs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = WebhookCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "received" => counts.received = count,
                "processing" => counts.processing = count,
                "processed" => counts.processed = count,
                "failed" => counts.failed = count,
                "skipped" => counts.skipped = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}
