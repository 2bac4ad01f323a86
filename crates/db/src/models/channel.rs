//! Channel manager integration models.
//!
//! Covers the channel connection, the unit-to-channel mapping, the durable
//! outbound event queue (outbox pattern), per-attempt API call logs, the
//! inbound idempotency ledger, and the sync audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================
// Status Enums
// ============================================

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Pending => write!(f, "pending"),
            ConnectionStatus::Active => write!(f, "active"),
            ConnectionStatus::Inactive => write!(f, "inactive"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ConnectionStatus::Pending),
            "active" => Ok(ConnectionStatus::Active),
            "inactive" => Ok(ConnectionStatus::Inactive),
            "error" => Ok(ConnectionStatus::Error),
            _ => Err(format!(
                "Invalid connection status '{}'. Valid values: pending, active, inactive, error",
                s
            )),
        }
    }
}

/// Outbox event processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl OutboxStatus {
    /// Completed and failed rows are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Completed | OutboxStatus::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "pending"),
            OutboxStatus::Processing => write!(f, "processing"),
            OutboxStatus::Completed => write!(f, "completed"),
            OutboxStatus::Failed => write!(f, "failed"),
            OutboxStatus::Retrying => write!(f, "retrying"),
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "completed" => Ok(OutboxStatus::Completed),
            "failed" => Ok(OutboxStatus::Failed),
            "retrying" => Ok(OutboxStatus::Retrying),
            _ => Err(format!("Invalid outbox status '{}'", s)),
        }
    }
}

/// Outbox event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventType {
    PriceUpdate,
    AvailUpdate,
    FullSync,
}

impl fmt::Display for OutboxEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxEventType::PriceUpdate => write!(f, "price_update"),
            OutboxEventType::AvailUpdate => write!(f, "avail_update"),
            OutboxEventType::FullSync => write!(f, "full_sync"),
        }
    }
}

impl FromStr for OutboxEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "price_update" => Ok(OutboxEventType::PriceUpdate),
            "avail_update" => Ok(OutboxEventType::AvailUpdate),
            "full_sync" => Ok(OutboxEventType::FullSync),
            _ => Err(format!(
                "Invalid outbox event type '{}'. Valid values: price_update, avail_update, full_sync",
                s
            )),
        }
    }
}

/// Sync direction for audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditDirection {
    Outbound,
    Inbound,
}

impl fmt::Display for AuditDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditDirection::Outbound => write!(f, "outbound"),
            AuditDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Entity type synced in an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Rate,
    Availability,
    Restrictions,
    Booking,
    FullSync,
}

impl fmt::Display for AuditEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEntityType::Rate => write!(f, "rate"),
            AuditEntityType::Availability => write!(f, "availability"),
            AuditEntityType::Restrictions => write!(f, "restrictions"),
            AuditEntityType::Booking => write!(f, "booking"),
            AuditEntityType::FullSync => write!(f, "full_sync"),
        }
    }
}

// ============================================
// Entities
// ============================================

/// Channel manager connection. One per project and provider.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ChannelConnection {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Channel provider identifier (a single fixed provider today).
    pub provider: String,
    /// API key, redacted from all logs.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub external_property_id: Option<String>,
    pub external_group_id: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub webhook_url: Option<String>,
    pub status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ChannelConnection {
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active.to_string() && self.deleted_at.is_none()
    }
}

/// Create connection request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConnection {
    pub project_id: Uuid,
    pub api_key: String,
    pub external_property_id: String,
    pub external_group_id: Option<String>,
    pub webhook_secret: Option<String>,
}

/// Maps an internal unit to the channel's room type and rate plan.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ExternalMapping {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub unit_id: Uuid,
    pub external_room_type_id: Option<String>,
    pub external_rate_plan_id: Option<String>,
    pub is_active: bool,
    pub last_price_sync_at: Option<DateTime<Utc>>,
    pub last_avail_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create mapping request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateMapping {
    pub connection_id: Uuid,
    pub unit_id: Uuid,
    pub external_room_type_id: String,
    pub external_rate_plan_id: String,
}

/// Durable outbound event. Processed by the outbox worker with retries.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct IntegrationOutbox {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub event_type: String,
    /// Structured payload; canonically carries `unit_id` and `days_ahead`.
    pub payload: serde_json::Value,
    pub unit_id: Option<Uuid>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub response_data: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Deduplicates enqueues; unique when set.
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New outbox event to enqueue.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub connection_id: Uuid,
    pub event_type: OutboxEventType,
    pub unit_id: Uuid,
    pub days_ahead: i64,
    pub idempotency_key: Option<String>,
}

impl NewOutboxEvent {
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "unit_id": self.unit_id,
            "days_ahead": self.days_ahead,
        })
    }
}

/// Per-attempt observability log for integration traffic.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct IntegrationLog {
    pub id: Uuid,
    pub connection_id: Option<Uuid>,
    pub outbox_id: Option<Uuid>,
    /// "api_call", "webhook_received", "error", "info".
    pub log_type: String,
    pub direction: String,
    pub event_type: Option<String>,
    pub request_method: Option<String>,
    pub request_url: Option<String>,
    /// Sanitized payload; secrets replaced with "[REDACTED]".
    pub request_payload: Option<serde_json::Value>,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<i32>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New integration log entry.
#[derive(Debug, Clone)]
pub struct NewIntegrationLog {
    pub connection_id: Option<Uuid>,
    pub outbox_id: Option<Uuid>,
    pub log_type: String,
    pub direction: AuditDirection,
    pub event_type: Option<String>,
    pub request_method: Option<String>,
    pub request_url: Option<String>,
    pub request_payload: Option<serde_json::Value>,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: Option<i32>,
    pub request_id: Option<String>,
}

/// Tracks processed webhook events so duplicates are suppressed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct InboundIdempotency {
    pub id: Uuid,
    pub provider: String,
    pub external_event_id: String,
    pub external_reservation_id: Option<String>,
    pub revision_id: Option<String>,
    pub result_action: Option<String>,
    pub internal_booking_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Audit trail row for every sync attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct IntegrationAudit {
    pub id: Uuid,
    pub connection_id: Option<Uuid>,
    pub direction: String,
    pub entity_type: String,
    pub external_id: Option<String>,
    pub unit_id: Option<Uuid>,
    /// SHA-256 of the canonical payload; verifies what was sent without
    /// retaining bodies.
    pub payload_hash: Option<String>,
    pub payload_size_bytes: Option<i32>,
    pub date_from: Option<chrono::NaiveDate>,
    pub date_to: Option<chrono::NaiveDate>,
    pub records_count: Option<i32>,
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub duration_ms: Option<i32>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New audit row.
#[derive(Debug, Clone)]
pub struct NewIntegrationAudit {
    pub connection_id: Option<Uuid>,
    pub direction: AuditDirection,
    pub entity_type: AuditEntityType,
    pub external_id: Option<String>,
    pub unit_id: Option<Uuid>,
    pub payload_hash: Option<String>,
    pub payload_size_bytes: Option<i32>,
    pub date_from: Option<chrono::NaiveDate>,
    pub date_to: Option<chrono::NaiveDate>,
    pub records_count: Option<i32>,
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub duration_ms: Option<i32>,
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_round_trip() {
        for s in ["pending", "active", "inactive", "error"] {
            let parsed = ConnectionStatus::from_str(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!(ConnectionStatus::from_str("bogus").is_err());
    }

    #[test]
    fn test_outbox_terminal_states() {
        assert!(OutboxStatus::Completed.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
        assert!(!OutboxStatus::Retrying.is_terminal());
        assert!(!OutboxStatus::Processing.is_terminal());
    }

    #[test]
    fn test_event_type_round_trip() {
        for s in ["price_update", "avail_update", "full_sync"] {
            assert_eq!(OutboxEventType::from_str(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_new_outbox_event_payload_shape() {
        let ev = NewOutboxEvent {
            connection_id: Uuid::new_v4(),
            event_type: OutboxEventType::PriceUpdate,
            unit_id: Uuid::new_v4(),
            days_ahead: 365,
            idempotency_key: None,
        };
        let payload = ev.payload();
        assert_eq!(payload["days_ahead"], 365);
        assert!(payload["unit_id"].is_string());
    }
}
