//! Unit repository. The engine reads unit state and flips the status to
//! needs_cleaning after checkout.

use crate::models::unit::{Unit, UnitStatus};
use crate::DbPool;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Repository for unit operations.
#[derive(Clone)]
pub struct UnitRepository {
    pool: DbPool,
}

impl UnitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Unit>, SqlxError> {
        sqlx::query_as::<_, Unit>("SELECT * FROM units WHERE id = $1 AND NOT is_deleted")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_status(&self, id: Uuid, status: UnitStatus) -> Result<bool, SqlxError> {
        let result = sqlx::query(
            "UPDATE units SET status = $2, updated_at = NOW() WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
