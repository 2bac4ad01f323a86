//! Inbound idempotency ledger. One row per processed webhook event.

use crate::models::channel::InboundIdempotency;
use crate::DbPool;
use sqlx::{Error as SqlxError, PgConnection};
use uuid::Uuid;

/// Repository for the inbound idempotency ledger.
#[derive(Clone)]
pub struct InboundIdempotencyRepository {
    pool: DbPool,
}

impl InboundIdempotencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a processed event. `(provider, external_event_id)` is unique;
    /// a replay is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        conn: &mut PgConnection,
        provider: &str,
        external_event_id: &str,
        external_reservation_id: Option<&str>,
        revision_id: Option<&str>,
        result_action: &str,
        internal_booking_id: Option<Uuid>,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            INSERT INTO inbound_idempotency (
                provider, external_event_id, external_reservation_id,
                revision_id, result_action, internal_booking_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (provider, external_event_id) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(external_event_id)
        .bind(external_reservation_id)
        .bind(revision_id)
        .bind(result_action)
        .bind(internal_booking_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn find(
        &self,
        provider: &str,
        external_event_id: &str,
    ) -> Result<Option<InboundIdempotency>, SqlxError> {
        sqlx::query_as::<_, InboundIdempotency>(
            r#"
            SELECT * FROM inbound_idempotency
            WHERE provider = $1 AND external_event_id = $2
            "#,
        )
        .bind(provider)
        .bind(external_event_id)
        .fetch_optional(&self.pool)
        .await
    }
}
