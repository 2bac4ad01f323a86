//! Inventory calendar projection cache.
//!
//! One row per `(unit_id, date)`. The cache accelerates calendar scans; the
//! availability projector remains authoritative.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Cached availability for one unit-date.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct InventoryCalendar {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub date: NaiveDate,
    pub is_available: bool,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub booking_id: Option<Uuid>,
    /// Restriction flags pushed alongside availability.
    pub stop_sell: bool,
    pub min_stay: Option<i32>,
    /// Set when the row changed and has not been pushed to the channel yet.
    pub sync_pending: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
