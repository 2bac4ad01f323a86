//! Inventory calendar repository.
//!
//! The calendar is a projection cache over bookings and unit state. Diff
//! logic for booking modifications frees the departing range and books the
//! arriving one.

use crate::models::inventory::InventoryCalendar;
use crate::DbPool;
use chrono::NaiveDate;
use sqlx::{Error as SqlxError, PgConnection};
use uuid::Uuid;

/// Result of applying a booking change to the calendar.
#[derive(Debug, Clone, Default)]
pub struct InventoryDiff {
    pub dates_freed: u64,
    pub dates_booked: u64,
    pub unit_changed: bool,
}

/// Repository for inventory calendar operations.
#[derive(Clone)]
pub struct InventoryRepository {
    pool: DbPool,
}

impl InventoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Mark `[check_in, check_out)` booked for a booking. Upserts rows per
    /// date.
    pub async fn mark_dates_booked(
        &self,
        conn: &mut PgConnection,
        unit_id: Uuid,
        booking_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<u64, SqlxError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inventory_calendar (unit_id, date, is_available, is_blocked, booking_id, sync_pending)
            SELECT $1, d::DATE, FALSE, FALSE, $2, TRUE
            FROM generate_series($3::DATE, $4::DATE - INTERVAL '1 day', INTERVAL '1 day') AS d
            ON CONFLICT (unit_id, date) DO UPDATE
            SET is_available = FALSE,
                is_blocked = FALSE,
                booking_id = EXCLUDED.booking_id,
                sync_pending = TRUE,
                updated_at = NOW()
            "#,
        )
        .bind(unit_id)
        .bind(booking_id)
        .bind(check_in)
        .bind(check_out)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Free `[check_in, check_out)`. When a booking id is given, only rows
    /// held by that booking are released.
    pub async fn mark_dates_available(
        &self,
        conn: &mut PgConnection,
        unit_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        booking_id: Option<Uuid>,
    ) -> Result<u64, SqlxError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_calendar
            SET is_available = TRUE, booking_id = NULL, sync_pending = TRUE, updated_at = NOW()
            WHERE unit_id = $1
              AND date >= $2 AND date < $3
              AND ($4::UUID IS NULL OR booking_id = $4)
            "#,
        )
        .bind(unit_id)
        .bind(check_in)
        .bind(check_out)
        .bind(booking_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Apply a booking modification. Unit moves free the whole old range on
    /// the old unit; same-unit date changes free and book only the
    /// difference.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_booking_change(
        &self,
        conn: &mut PgConnection,
        unit_id: Uuid,
        booking_id: Uuid,
        old_unit_id: Uuid,
        old_check_in: NaiveDate,
        old_check_out: NaiveDate,
        new_check_in: NaiveDate,
        new_check_out: NaiveDate,
    ) -> Result<InventoryDiff, SqlxError> {
        let mut diff = InventoryDiff {
            unit_changed: old_unit_id != unit_id,
            ..Default::default()
        };

        if diff.unit_changed {
            diff.dates_freed = self
                .mark_dates_available(conn, old_unit_id, old_check_in, old_check_out, Some(booking_id))
                .await?;
            diff.dates_booked = self
                .mark_dates_booked(conn, unit_id, booking_id, new_check_in, new_check_out)
                .await?;
        } else {
            // Free the departing part of the old range, then book the new
            // range; the overlap is rewritten in place.
            diff.dates_freed = sqlx::query(
                r#"
                UPDATE inventory_calendar
                SET is_available = TRUE, booking_id = NULL, sync_pending = TRUE, updated_at = NOW()
                WHERE unit_id = $1
                  AND booking_id = $2
                  AND date >= $3 AND date < $4
                  AND (date < $5 OR date >= $6)
                "#,
            )
            .bind(unit_id)
            .bind(booking_id)
            .bind(old_check_in)
            .bind(old_check_out)
            .bind(new_check_in)
            .bind(new_check_out)
            .execute(&mut *conn)
            .await?
            .rows_affected();

            diff.dates_booked = self
                .mark_dates_booked(conn, unit_id, booking_id, new_check_in, new_check_out)
                .await?;
        }

        Ok(diff)
    }

    /// Free the whole range of a cancelled booking.
    pub async fn apply_cancellation(
        &self,
        conn: &mut PgConnection,
        unit_id: Uuid,
        booking_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<u64, SqlxError> {
        self.mark_dates_available(conn, unit_id, check_in, check_out, Some(booking_id))
            .await
    }

    pub async fn get_range(
        &self,
        unit_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InventoryCalendar>, SqlxError> {
        sqlx::query_as::<_, InventoryCalendar>(
            r#"
            SELECT * FROM inventory_calendar
            WHERE unit_id = $1 AND date >= $2 AND date < $3
            ORDER BY date
            "#,
        )
        .bind(unit_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
    }
}
