//! Customer repository. Counter updates are single atomic UPDATEs; lookups
//! that precede writes take a row lock.

use crate::models::customer::Customer;
use crate::DbPool;
use rust_decimal::Decimal;
use sqlx::{Error as SqlxError, PgConnection};
use uuid::Uuid;

/// Repository for customer operations.
#[derive(Clone)]
pub struct CustomerRepository {
    pool: DbPool,
}

impl CustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<Customer>, SqlxError> {
        sqlx::query_as::<_, Customer>(
            "SELECT * FROM customers WHERE phone = $1 AND NOT is_deleted",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
    }

    /// Row-locked lookup by normalized phone, inside the caller's
    /// transaction.
    pub async fn find_by_phone_for_update(
        &self,
        conn: &mut PgConnection,
        phone: &str,
    ) -> Result<Option<Customer>, SqlxError> {
        sqlx::query_as::<_, Customer>(
            "SELECT * FROM customers WHERE phone = $1 AND NOT is_deleted FOR UPDATE",
        )
        .bind(phone)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        name: &str,
        phone: &str,
        email: Option<&str>,
        gender: Option<&str>,
        booking_count: i32,
        total_revenue: Decimal,
        is_profile_complete: bool,
        notes: Option<&str>,
    ) -> Result<Customer, SqlxError> {
        sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (
                name, phone, email, gender, booking_count, total_revenue,
                is_profile_complete, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(phone)
        .bind(email)
        .bind(gender)
        .bind(booking_count)
        .bind(total_revenue)
        .bind(is_profile_complete)
        .bind(notes)
        .fetch_one(&mut *conn)
        .await
    }

    /// Non-destructive profile update: the name only grows longer, the
    /// gender is set once.
    pub async fn update_profile(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        name: Option<&str>,
        gender: Option<&str>,
        is_profile_complete: bool,
    ) -> Result<Customer, SqlxError> {
        sqlx::query_as::<_, Customer>(
            r#"
            UPDATE customers
            SET name = COALESCE($2, name),
                gender = COALESCE(gender, $3),
                is_profile_complete = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(gender)
        .bind(is_profile_complete)
        .fetch_one(&mut *conn)
        .await
    }

    /// Atomic counter bump. Never read-modify-write.
    pub async fn apply_booking_counters(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        bookings_delta: i32,
        revenue_delta: Decimal,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE customers
            SET booking_count = COALESCE(booking_count, 0) + $2,
                total_revenue = COALESCE(total_revenue, 0) + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(bookings_delta)
        .bind(revenue_delta)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
