//! Rate state repository.
//!
//! Wraps the token bucket model in row-locked transactions so consumption
//! and pause state are observed consistently across workers. The HTTP client
//! calls into this immediately before each external request.

use crate::models::rate_state::{PropertyRateState, RateBucket};
use crate::DbPool;
use chrono::Utc;
use sqlx::{Error as SqlxError, PgConnection};

/// Repository for per-property rate limiting state.
#[derive(Clone)]
pub struct RateStateRepository {
    pool: DbPool,
}

impl RateStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load the row under lock, creating it with full buckets on first use.
    async fn lock_or_create(
        &self,
        conn: &mut PgConnection,
        external_property_id: &str,
    ) -> Result<PropertyRateState, SqlxError> {
        // Insert-if-missing first so the FOR UPDATE below always finds a row.
        sqlx::query(
            r#"
            INSERT INTO property_rate_states (external_property_id)
            VALUES ($1)
            ON CONFLICT (external_property_id) DO NOTHING
            "#,
        )
        .bind(external_property_id)
        .execute(&mut *conn)
        .await?;

        sqlx::query_as::<_, PropertyRateState>(
            "SELECT * FROM property_rate_states WHERE external_property_id = $1 FOR UPDATE",
        )
        .bind(external_property_id)
        .fetch_one(&mut *conn)
        .await
    }

    async fn store(
        &self,
        conn: &mut PgConnection,
        state: &PropertyRateState,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE property_rate_states
            SET price_tokens = $2, price_last_refill_at = $3,
                avail_tokens = $4, avail_last_refill_at = $5,
                paused_until = $6, pause_count = $7, last_429_at = $8,
                total_requests = $9, total_429s = $10, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(state.id)
        .bind(state.price_tokens)
        .bind(state.price_last_refill_at)
        .bind(state.avail_tokens)
        .bind(state.avail_last_refill_at)
        .bind(state.paused_until)
        .bind(state.pause_count)
        .bind(state.last_429_at)
        .bind(state.total_requests)
        .bind(state.total_429s)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Try to consume one token from a bucket. Refills by elapsed time first.
    pub async fn try_consume(
        &self,
        external_property_id: &str,
        bucket: RateBucket,
    ) -> Result<bool, SqlxError> {
        let mut tx = self.pool.begin().await?;
        let mut state = self.lock_or_create(&mut tx, external_property_id).await?;
        let consumed = state.try_consume(bucket, Utc::now());
        self.store(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(consumed)
    }

    /// Seconds until a token becomes available in the bucket.
    pub async fn wait_time_for_token(
        &self,
        external_property_id: &str,
        bucket: RateBucket,
    ) -> Result<f64, SqlxError> {
        let mut tx = self.pool.begin().await?;
        let mut state = self.lock_or_create(&mut tx, external_property_id).await?;
        let wait = state.wait_time_for_token(bucket, Utc::now());
        self.store(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(wait)
    }

    /// Remaining pause in seconds, or `None` when the property is not
    /// paused.
    pub async fn pause_remaining_secs(
        &self,
        external_property_id: &str,
    ) -> Result<Option<i64>, SqlxError> {
        let state = sqlx::query_as::<_, PropertyRateState>(
            "SELECT * FROM property_rate_states WHERE external_property_id = $1",
        )
        .bind(external_property_id)
        .fetch_optional(&self.pool)
        .await?;

        let now = Utc::now();
        Ok(state.and_then(|s| {
            if s.is_paused(now) {
                Some(s.pause_remaining_secs(now))
            } else {
                None
            }
        }))
    }

    /// Pause the property after a 429. Returns the refreshed state.
    pub async fn pause_on_429(
        &self,
        external_property_id: &str,
    ) -> Result<PropertyRateState, SqlxError> {
        let mut tx = self.pool.begin().await?;
        let mut state = self.lock_or_create(&mut tx, external_property_id).await?;
        state.pause_on_429(Utc::now());
        self.store(&mut tx, &state).await?;
        tx.commit().await?;

        tracing::warn!(
            property_id = %external_property_id,
            paused_until = ?state.paused_until,
            pause_count = state.pause_count,
            "property paused after 429"
        );
        Ok(state)
    }

    /// Clear an elapsed pause after a successful request.
    pub async fn clear_pause(&self, external_property_id: &str) -> Result<(), SqlxError> {
        let mut tx = self.pool.begin().await?;
        let mut state = self.lock_or_create(&mut tx, external_property_id).await?;
        state.clear_pause(Utc::now());
        self.store(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(
        &self,
        external_property_id: &str,
    ) -> Result<Option<PropertyRateState>, SqlxError> {
        sqlx::query_as::<_, PropertyRateState>(
            "SELECT * FROM property_rate_states WHERE external_property_id = $1",
        )
        .bind(external_property_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Properties currently paused, for health reporting.
    pub async fn list_paused(&self) -> Result<Vec<PropertyRateState>, SqlxError> {
        sqlx::query_as::<_, PropertyRateState>(
            "SELECT * FROM property_rate_states WHERE paused_until IS NOT NULL AND paused_until > NOW()",
        )
        .fetch_all(&self.pool)
        .await
    }
}
