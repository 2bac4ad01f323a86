//! Booking revision repository. One row per `(external_booking_id,
//! revision_id)`; out-of-order revisions are stored with `applied = false`.

use crate::models::booking::BookingRevision;
use crate::DbPool;
use sqlx::{Error as SqlxError, PgConnection};
use uuid::Uuid;

/// Repository for booking revision audit rows.
#[derive(Clone)]
pub struct BookingRevisionRepository {
    pool: DbPool,
}

impl BookingRevisionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn exists(
        &self,
        external_booking_id: &str,
        revision_id: &str,
    ) -> Result<bool, SqlxError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM booking_revisions
            WHERE external_booking_id = $1 AND revision_id = $2
            "#,
        )
        .bind(external_booking_id)
        .bind(revision_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Insert a revision inside the caller's transaction. The unique
    /// constraint makes a duplicate a no-op.
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        booking_id: Option<Uuid>,
        external_booking_id: &str,
        revision_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        applied: bool,
    ) -> Result<Option<BookingRevision>, SqlxError> {
        sqlx::query_as::<_, BookingRevision>(
            r#"
            INSERT INTO booking_revisions (
                booking_id, external_booking_id, revision_id, event_type, payload, applied
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_booking_id, revision_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(external_booking_id)
        .bind(revision_id)
        .bind(event_type)
        .bind(payload)
        .bind(applied)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn list_for_external_booking(
        &self,
        external_booking_id: &str,
    ) -> Result<Vec<BookingRevision>, SqlxError> {
        sqlx::query_as::<_, BookingRevision>(
            r#"
            SELECT * FROM booking_revisions
            WHERE external_booking_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(external_booking_id)
        .fetch_all(&self.pool)
        .await
    }
}
