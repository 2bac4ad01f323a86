//! Channel connection repository.

use crate::models::channel::{ChannelConnection, ConnectionStatus, CreateConnection};
use crate::DbPool;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Repository for channel connection operations.
#[derive(Clone)]
pub struct ConnectionRepository {
    pool: DbPool,
}

impl ConnectionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a connection for a project. At most one per (project, provider)
    /// is enforced by the unique constraint. A webhook secret is generated
    /// when the caller does not supply one.
    pub async fn create(
        &self,
        data: CreateConnection,
        provider: &str,
    ) -> Result<ChannelConnection, SqlxError> {
        let webhook_secret = data.webhook_secret.unwrap_or_else(generate_webhook_secret);

        sqlx::query_as::<_, ChannelConnection>(
            r#"
            INSERT INTO channel_connections (
                project_id, provider, api_key, external_property_id,
                external_group_id, webhook_secret, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
            "#,
        )
        .bind(data.project_id)
        .bind(provider)
        .bind(&data.api_key)
        .bind(&data.external_property_id)
        .bind(&data.external_group_id)
        .bind(&webhook_secret)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ChannelConnection>, SqlxError> {
        sqlx::query_as::<_, ChannelConnection>(
            "SELECT * FROM channel_connections WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Find the active connection for an external property id. The webhook
    /// processor routes inbound bookings through this lookup.
    pub async fn find_active_by_property(
        &self,
        provider: &str,
        external_property_id: &str,
    ) -> Result<Option<ChannelConnection>, SqlxError> {
        sqlx::query_as::<_, ChannelConnection>(
            r#"
            SELECT * FROM channel_connections
            WHERE external_property_id = $1
              AND provider = $2
              AND status = 'active'
              AND deleted_at IS NULL
            "#,
        )
        .bind(external_property_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_active(&self) -> Result<Vec<ChannelConnection>, SqlxError> {
        sqlx::query_as::<_, ChannelConnection>(
            r#"
            SELECT * FROM channel_connections
            WHERE status = 'active' AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<ChannelConnection>, SqlxError> {
        sqlx::query_as::<_, ChannelConnection>(
            "SELECT * FROM channel_connections WHERE deleted_at IS NULL ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn set_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
    ) -> Result<Option<ChannelConnection>, SqlxError> {
        sqlx::query_as::<_, ChannelConnection>(
            r#"
            UPDATE channel_connections
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Record a successful sync: stamp the time and zero the error streak.
    pub async fn record_sync_success(&self, id: Uuid) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE channel_connections
            SET last_sync_at = NOW(), error_count = 0, last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a sync error. Authorization failures additionally flip the
    /// connection into the error state.
    pub async fn record_sync_error(
        &self,
        id: Uuid,
        error: &str,
        mark_error_status: bool,
    ) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE channel_connections
            SET last_error = LEFT($2, 1000),
                error_count = error_count + 1,
                status = CASE WHEN $3 THEN 'error' ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(mark_error_status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft delete. Mappings cascade via the foreign key when the row is
    /// eventually purged; until then they are filtered by the join.
    pub async fn soft_delete(&self, id: Uuid) -> Result<bool, SqlxError> {
        let result = sqlx::query(
            r#"
            UPDATE channel_connections
            SET deleted_at = NOW(), status = 'inactive', updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Random 48-character webhook secret.
fn generate_webhook_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_webhook_secret();
        assert_eq!(secret.len(), 48);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_webhook_secret());
    }
}
