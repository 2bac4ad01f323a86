//! Booking repository.
//!
//! Creating or mutating a booking locks the unit row first, then checks for
//! overlap, then writes. That ordering closes the check-then-write race
//! between concurrent webhook workers and manual bookings.

use crate::models::booking::{Booking, BookingStatus, NewChannelBooking, SourceType};
use crate::DbPool;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Error as SqlxError, PgConnection};
use thiserror::Error;
use uuid::Uuid;

/// Booking-level errors beyond plain database failures.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Booking not found")]
    NotFound,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),
}

/// Field changes extracted from a booking.modified revision. `None` leaves
/// the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct BookingRevisionUpdate {
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
    pub check_in_date: Option<NaiveDate>,
    pub check_out_date: Option<NaiveDate>,
    pub total_price: Option<Decimal>,
    pub currency: Option<String>,
    pub status: Option<BookingStatus>,
    pub revision_id: Option<String>,
    /// The revision's own timestamp; falls back to apply time when the
    /// payload carries none.
    pub revision_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub channel_data: Option<serde_json::Value>,
}

/// Repository for booking operations.
#[derive(Clone)]
pub struct BookingRepository {
    pool: DbPool,
}

impl BookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1 AND NOT is_deleted")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_by_external(
        &self,
        external_reservation_id: &str,
    ) -> Result<Option<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE external_reservation_id = $1 AND NOT is_deleted",
        )
        .bind(external_reservation_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Row-locked lookup by external reservation id, inside the caller's
    /// transaction.
    pub async fn find_by_external_for_update(
        &self,
        conn: &mut PgConnection,
        external_reservation_id: &str,
    ) -> Result<Option<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE external_reservation_id = $1 AND NOT is_deleted
            FOR UPDATE
            "#,
        )
        .bind(external_reservation_id)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Acquire an exclusive lock on the unit row. Returns false when the
    /// unit does not exist or is deleted.
    pub async fn lock_unit(
        &self,
        conn: &mut PgConnection,
        unit_id: Uuid,
    ) -> Result<bool, SqlxError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM units WHERE id = $1 AND NOT is_deleted FOR UPDATE")
                .bind(unit_id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row.is_some())
    }

    /// Find a non-cancelled booking overlapping the half-open range
    /// `[check_in, check_out)` on the unit, excluding rows that carry the
    /// same external reservation id (re-deliveries and self-modifications).
    pub async fn find_conflict(
        &self,
        conn: &mut PgConnection,
        unit_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude_external_id: Option<&str>,
    ) -> Result<Option<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE unit_id = $1
              AND NOT is_deleted
              AND status <> 'cancelled'
              AND check_in_date < $3
              AND check_out_date > $2
              AND ($4::TEXT IS NULL
                   OR external_reservation_id IS NULL
                   OR external_reservation_id <> $4)
            LIMIT 1
            "#,
        )
        .bind(unit_id)
        .bind(check_in)
        .bind(check_out)
        .bind(exclude_external_id)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Insert a booking that arrived through the channel.
    pub async fn insert_channel_booking(
        &self,
        conn: &mut PgConnection,
        data: &NewChannelBooking,
    ) -> Result<Booking, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (
                unit_id, customer_id, guest_name, guest_phone, guest_email,
                check_in_date, check_out_date, total_price, currency, status,
                notes, source_type, channel_source, external_reservation_id,
                external_revision_id, last_applied_revision_id,
                last_applied_revision_at, channel_data, customer_snapshot
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $15, COALESCE($16, NOW()), $17, $18
            )
            RETURNING *
            "#,
        )
        .bind(data.unit_id)
        .bind(data.customer_id)
        .bind(&data.guest_name)
        .bind(&data.guest_phone)
        .bind(&data.guest_email)
        .bind(data.check_in_date)
        .bind(data.check_out_date)
        .bind(data.total_price)
        .bind(&data.currency)
        .bind(data.status.to_string())
        .bind(&data.notes)
        .bind(SourceType::Channex.to_string())
        .bind(&data.channel_source)
        .bind(&data.external_reservation_id)
        .bind(&data.external_revision_id)
        .bind(data.revision_timestamp)
        .bind(&data.channel_data)
        .bind(&data.customer_snapshot)
        .fetch_one(&mut *conn)
        .await
    }

    /// Apply field changes from an in-order booking.modified revision.
    pub async fn apply_revision(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        update: &BookingRevisionUpdate,
    ) -> Result<Booking, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET guest_name = COALESCE($2, guest_name),
                guest_phone = COALESCE($3, guest_phone),
                guest_email = COALESCE($4, guest_email),
                check_in_date = COALESCE($5, check_in_date),
                check_out_date = COALESCE($6, check_out_date),
                total_price = COALESCE($7, total_price),
                currency = COALESCE($8, currency),
                status = COALESCE($9, status),
                external_revision_id = COALESCE($10, external_revision_id),
                last_applied_revision_id = COALESCE($10, last_applied_revision_id),
                last_applied_revision_at = COALESCE($11, NOW()),
                channel_data = COALESCE($12, channel_data),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.guest_name)
        .bind(&update.guest_phone)
        .bind(&update.guest_email)
        .bind(update.check_in_date)
        .bind(update.check_out_date)
        .bind(update.total_price)
        .bind(&update.currency)
        .bind(update.status.map(|s| s.to_string()))
        .bind(&update.revision_id)
        .bind(update.revision_timestamp)
        .bind(&update.channel_data)
        .fetch_one(&mut *conn)
        .await
    }

    /// Cancel a booking from a channel cancellation event, appending a
    /// UTC-stamped note.
    pub async fn cancel_from_channel(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        revision_id: Option<&str>,
        note: &str,
    ) -> Result<Booking, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'cancelled',
                external_revision_id = COALESCE($2, external_revision_id),
                last_applied_revision_id = COALESCE($2, last_applied_revision_id),
                last_applied_revision_at = NOW(),
                notes = CONCAT(COALESCE(notes, ''), $3),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(revision_id)
        .bind(note)
        .fetch_one(&mut *conn)
        .await
    }

    /// Row-locked status transition, validated against the lifecycle.
    pub async fn transition_status(
        &self,
        id: Uuid,
        next: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let mut tx = self.pool.begin().await?;

        let booking = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE id = $1 AND NOT is_deleted FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::NotFound)?;

        let current: BookingStatus = booking
            .status
            .parse()
            .map_err(|_| BookingError::InvalidTransition {
                from: booking.status.clone(),
                to: next.to_string(),
            })?;

        if !current.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        let updated = sqlx::query_as::<_, Booking>(
            "UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(next.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Bookings holding inventory on the unit, ending on or after `from`.
    /// Input for the availability projector.
    pub async fn list_active_for_unit(
        &self,
        unit_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE unit_id = $1
              AND NOT is_deleted
              AND status IN ('pending', 'confirmed', 'checked_in')
              AND check_out_date >= $2
            ORDER BY check_in_date
            "#,
        )
        .bind(unit_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await
    }

    /// Checked-in stays whose check-out date has passed. The lifecycle job
    /// completes these and marks their units for cleaning.
    pub async fn list_expired_checked_in(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE status = 'checked_in'
              AND check_out_date < $1
              AND NOT is_deleted
            ORDER BY check_out_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
    }

    /// Confirmed bookings whose check-out passed without a check-in.
    pub async fn list_no_shows(&self, today: NaiveDate) -> Result<Vec<Booking>, SqlxError> {
        sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE status = 'confirmed'
              AND check_out_date < $1
              AND NOT is_deleted
            ORDER BY check_out_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
    }

    /// Cancel a no-show with an audit note. Bypasses the transition table on
    /// purpose: the stay never reached checked_in.
    pub async fn cancel_no_show(&self, id: Uuid, note: &str) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'cancelled',
                notes = CONCAT(COALESCE(notes, ''), $2),
                updated_at = NOW()
            WHERE id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
