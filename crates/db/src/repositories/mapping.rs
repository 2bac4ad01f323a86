//! External mapping repository: unit ↔ (room type, rate plan) on the channel.

use crate::models::channel::{CreateMapping, ExternalMapping};
use crate::DbPool;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Repository for external mapping operations.
#[derive(Clone)]
pub struct MappingRepository {
    pool: DbPool,
}

impl MappingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create or reactivate the mapping for a unit. `(connection_id, unit_id)`
    /// is unique; repeated creates update the external ids in place.
    pub async fn upsert(&self, data: CreateMapping) -> Result<ExternalMapping, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>(
            r#"
            INSERT INTO external_mappings (
                connection_id, unit_id, external_room_type_id, external_rate_plan_id, is_active
            )
            VALUES ($1, $2, $3, $4, TRUE)
            ON CONFLICT (connection_id, unit_id) DO UPDATE
            SET external_room_type_id = EXCLUDED.external_room_type_id,
                external_rate_plan_id = EXCLUDED.external_rate_plan_id,
                is_active = TRUE,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(data.connection_id)
        .bind(data.unit_id)
        .bind(&data.external_room_type_id)
        .bind(&data.external_rate_plan_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ExternalMapping>, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>("SELECT * FROM external_mappings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_active_by_unit(
        &self,
        connection_id: Uuid,
        unit_id: Uuid,
    ) -> Result<Option<ExternalMapping>, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>(
            r#"
            SELECT * FROM external_mappings
            WHERE connection_id = $1 AND unit_id = $2 AND is_active
            "#,
        )
        .bind(connection_id)
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve a unit from the channel's room type id.
    pub async fn find_active_by_room_type(
        &self,
        connection_id: Uuid,
        room_type_id: &str,
    ) -> Result<Option<ExternalMapping>, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>(
            r#"
            SELECT * FROM external_mappings
            WHERE connection_id = $1 AND external_room_type_id = $2 AND is_active
            "#,
        )
        .bind(connection_id)
        .bind(room_type_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Fallback resolution from the rate plan id, used when the room type
    /// lookup misses.
    pub async fn find_active_by_rate_plan(
        &self,
        connection_id: Uuid,
        rate_plan_id: &str,
    ) -> Result<Option<ExternalMapping>, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>(
            r#"
            SELECT * FROM external_mappings
            WHERE connection_id = $1 AND external_rate_plan_id = $2 AND is_active
            "#,
        )
        .bind(connection_id)
        .bind(rate_plan_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Active mappings that carry a rate plan, for a connection. The price
    /// scheduler fans out over these.
    pub async fn list_active_with_rate_plan(
        &self,
        connection_id: Uuid,
    ) -> Result<Vec<ExternalMapping>, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>(
            r#"
            SELECT * FROM external_mappings
            WHERE connection_id = $1 AND is_active AND external_rate_plan_id IS NOT NULL
            ORDER BY created_at
            "#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn list_for_connection(
        &self,
        connection_id: Uuid,
    ) -> Result<Vec<ExternalMapping>, SqlxError> {
        sqlx::query_as::<_, ExternalMapping>(
            "SELECT * FROM external_mappings WHERE connection_id = $1 ORDER BY created_at",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn touch_price_sync(&self, id: Uuid) -> Result<(), SqlxError> {
        sqlx::query(
            "UPDATE external_mappings SET last_price_sync_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_avail_sync(&self, id: Uuid) -> Result<(), SqlxError> {
        sqlx::query(
            "UPDATE external_mappings SET last_avail_sync_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<bool, SqlxError> {
        let result = sqlx::query(
            "UPDATE external_mappings SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
