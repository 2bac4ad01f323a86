//! Integration observability: per-attempt API call logs and the sync audit
//! trail.

use crate::models::channel::{
    IntegrationAudit, IntegrationLog, NewIntegrationAudit, NewIntegrationLog,
};
use crate::DbPool;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Repository for per-attempt integration logs.
#[derive(Clone)]
pub struct IntegrationLogRepository {
    pool: DbPool,
}

impl IntegrationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, log: NewIntegrationLog) -> Result<IntegrationLog, SqlxError> {
        sqlx::query_as::<_, IntegrationLog>(
            r#"
            INSERT INTO integration_logs (
                connection_id, outbox_id, log_type, direction, event_type,
                request_method, request_url, request_payload, response_status,
                response_body, success, error_message, duration_ms, request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, LEFT($7, 500), $8, $9, $10, $11,
                    LEFT($12, 1000), $13, $14)
            RETURNING *
            "#,
        )
        .bind(log.connection_id)
        .bind(log.outbox_id)
        .bind(&log.log_type)
        .bind(log.direction.to_string())
        .bind(&log.event_type)
        .bind(&log.request_method)
        .bind(&log.request_url)
        .bind(&log.request_payload)
        .bind(log.response_status)
        .bind(&log.response_body)
        .bind(log.success)
        .bind(&log.error_message)
        .bind(log.duration_ms)
        .bind(&log.request_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Success flag of the most recent outbound API call, for health checks.
    pub async fn latest_api_call_success(&self) -> Result<Option<bool>, SqlxError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT success FROM integration_logs
            WHERE log_type = 'api_call' AND direction = 'outbound'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(success,)| success))
    }

    pub async fn list_for_connection(
        &self,
        connection_id: Uuid,
        limit: i64,
    ) -> Result<Vec<IntegrationLog>, SqlxError> {
        sqlx::query_as::<_, IntegrationLog>(
            r#"
            SELECT * FROM integration_logs
            WHERE connection_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(connection_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

/// Repository for the sync audit trail.
#[derive(Clone)]
pub struct AuditRepository {
    pool: DbPool,
}

impl AuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, audit: NewIntegrationAudit) -> Result<IntegrationAudit, SqlxError> {
        sqlx::query_as::<_, IntegrationAudit>(
            r#"
            INSERT INTO integration_audit (
                connection_id, direction, entity_type, external_id, unit_id,
                payload_hash, payload_size_bytes, date_from, date_to,
                records_count, status, error_message, retry_count,
                duration_ms, request_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    LEFT($12, 1000), $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(audit.connection_id)
        .bind(audit.direction.to_string())
        .bind(audit.entity_type.to_string())
        .bind(&audit.external_id)
        .bind(audit.unit_id)
        .bind(&audit.payload_hash)
        .bind(audit.payload_size_bytes)
        .bind(audit.date_from)
        .bind(audit.date_to)
        .bind(audit.records_count)
        .bind(&audit.status)
        .bind(&audit.error_message)
        .bind(audit.retry_count)
        .bind(audit.duration_ms)
        .bind(&audit.request_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<IntegrationAudit>, SqlxError> {
        sqlx::query_as::<_, IntegrationAudit>(
            "SELECT * FROM integration_audit ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
