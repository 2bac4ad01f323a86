//! Integration outbox repository.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so several workers cooperate
//! without double-processing; merge of overlapping events happens inside the
//! claim transaction while the rows are still locked.

use crate::models::channel::{IntegrationOutbox, NewOutboxEvent, OutboxStatus};
use crate::DbPool;
use chrono::{DateTime, Utc};
use sqlx::Error as SqlxError;
use std::collections::HashMap;
use uuid::Uuid;

/// Queue depth per status, for health reporting.
#[derive(Debug, Clone, Default, serde::Serialize, utoipa::ToSchema)]
pub struct OutboxCounts {
    pub pending: i64,
    pub processing: i64,
    pub retrying: i64,
    pub failed: i64,
    pub completed: i64,
}

/// Repository for outbox queue operations.
#[derive(Clone)]
pub struct OutboxRepository {
    pool: DbPool,
}

impl OutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Enqueue an event. A duplicate idempotency key is a no-op and returns
    /// `None`.
    pub async fn enqueue(
        &self,
        event: NewOutboxEvent,
    ) -> Result<Option<IntegrationOutbox>, SqlxError> {
        sqlx::query_as::<_, IntegrationOutbox>(
            r#"
            INSERT INTO integration_outbox (
                connection_id, event_type, payload, unit_id, status, idempotency_key
            )
            VALUES ($1, $2, $3, $4, 'pending', $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(event.connection_id)
        .bind(event.event_type.to_string())
        .bind(event.payload())
        .bind(event.unit_id)
        .bind(&event.idempotency_key)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<IntegrationOutbox>, SqlxError> {
        sqlx::query_as::<_, IntegrationOutbox>("SELECT * FROM integration_outbox WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Claim a batch of due events.
    ///
    /// In one transaction: lock due rows, merge overlapping `(unit_id,
    /// event_type)` pairs last-write-wins (older copies complete with
    /// "merged with newer event"), then mark the survivors processing with
    /// `attempts + 1`. Returns the survivors ready for execution.
    pub async fn claim_batch(
        &self,
        limit: i64,
        skip_locked: bool,
    ) -> Result<Vec<IntegrationOutbox>, SqlxError> {
        let mut tx = self.pool.begin().await?;

        let lock_clause = if skip_locked {
            "FOR UPDATE SKIP LOCKED"
        } else {
            "FOR UPDATE"
        };
        let query = format!(
            r#"
            SELECT * FROM integration_outbox
            WHERE status IN ('pending', 'retrying')
              AND next_attempt_at <= NOW()
              AND attempts < max_attempts
            ORDER BY next_attempt_at
            LIMIT $1
            {}
            "#,
            lock_clause
        );

        let candidates = sqlx::query_as::<_, IntegrationOutbox>(&query)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        // Last-write-wins merge per (unit_id, event_type)
        let mut survivors: HashMap<(Option<Uuid>, String), IntegrationOutbox> = HashMap::new();
        let mut merged_away: Vec<Uuid> = Vec::new();

        for event in candidates {
            let key = (event.unit_id, event.event_type.clone());
            match survivors.get(&key) {
                Some(existing) if existing.created_at >= event.created_at => {
                    merged_away.push(event.id);
                }
                Some(existing) => {
                    merged_away.push(existing.id);
                    survivors.insert(key, event);
                }
                None => {
                    survivors.insert(key, event);
                }
            }
        }

        if !merged_away.is_empty() {
            sqlx::query(
                r#"
                UPDATE integration_outbox
                SET status = 'completed',
                    last_error = 'merged with newer event',
                    completed_at = NOW(),
                    updated_at = NOW()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&merged_away)
            .execute(&mut *tx)
            .await?;
        }

        let survivor_ids: Vec<Uuid> = survivors.values().map(|e| e.id).collect();
        let claimed = if survivor_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as::<_, IntegrationOutbox>(
                r#"
                UPDATE integration_outbox
                SET status = 'processing', attempts = attempts + 1, updated_at = NOW()
                WHERE id = ANY($1)
                RETURNING *
                "#,
            )
            .bind(&survivor_ids)
            .fetch_all(&mut *tx)
            .await?
        };

        tx.commit().await?;

        // Oldest first, matching the claim order
        let mut claimed = claimed;
        claimed.sort_by_key(|e| e.next_attempt_at);
        Ok(claimed)
    }

    pub async fn mark_completed(
        &self,
        id: Uuid,
        response_data: Option<serde_json::Value>,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE integration_outbox
            SET status = 'completed', response_data = $2, completed_at = NOW(),
                last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(response_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_retrying(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE integration_outbox
            SET status = 'retrying', next_attempt_at = $2, last_error = LEFT($3, 1000),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure. The row is never mutated again.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE integration_outbox
            SET status = 'failed', last_error = LEFT($2, 1000), updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Manually retry a permanently failed event.
    pub async fn retry_failed(&self, id: Uuid) -> Result<Option<IntegrationOutbox>, SqlxError> {
        sqlx::query_as::<_, IntegrationOutbox>(
            r#"
            UPDATE integration_outbox
            SET status = 'pending', attempts = 0, next_attempt_at = NOW(),
                last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Crash recovery: rows left `processing` by a dead worker revert to
    /// `retrying` with the attempt count unchanged.
    pub async fn recover_stuck(&self, stuck_after_secs: i64) -> Result<u64, SqlxError> {
        let result = sqlx::query(
            r#"
            UPDATE integration_outbox
            SET status = 'retrying', next_attempt_at = NOW(),
                last_error = 'recovered from interrupted processing',
                updated_at = NOW()
            WHERE status = 'processing'
              AND updated_at < NOW() - ($1 * INTERVAL '1 second')
            "#,
        )
        .bind(stuck_after_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_failed(&self, limit: i64) -> Result<Vec<IntegrationOutbox>, SqlxError> {
        sqlx::query_as::<_, IntegrationOutbox>(
            r#"
            SELECT * FROM integration_outbox
            WHERE status = 'failed'
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn status_counts(&self) -> Result<OutboxCounts, SqlxError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM integration_outbox GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = OutboxCounts::default();
        for (status, count) in rows {
            match status.parse::<OutboxStatus>() {
                Ok(OutboxStatus::Pending) => counts.pending = count,
                Ok(OutboxStatus::Processing) => counts.processing = count,
                Ok(OutboxStatus::Retrying) => counts.retrying = count,
                Ok(OutboxStatus::Failed) => counts.failed = count,
                Ok(OutboxStatus::Completed) => counts.completed = count,
                Err(_) => {}
            }
        }
        Ok(counts)
    }
}
