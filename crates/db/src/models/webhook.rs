//! Inbound webhook models: raw event log and the unmatched-event quarantine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Processing status of a received webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Received,
    Processing,
    Processed,
    Failed,
    Skipped,
}

impl fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookEventStatus::Received => write!(f, "received"),
            WebhookEventStatus::Processing => write!(f, "processing"),
            WebhookEventStatus::Processed => write!(f, "processed"),
            WebhookEventStatus::Failed => write!(f, "failed"),
            WebhookEventStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for WebhookEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "received" => Ok(WebhookEventStatus::Received),
            "processing" => Ok(WebhookEventStatus::Processing),
            "processed" => Ok(WebhookEventStatus::Processed),
            "failed" => Ok(WebhookEventStatus::Failed),
            "skipped" => Ok(WebhookEventStatus::Skipped),
            _ => Err(format!("Invalid webhook event status '{}'", s)),
        }
    }
}

/// Raw inbound webhook event. The receiver persists the verbatim payload and
/// returns immediately; the processor picks rows up asynchronously.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventLog {
    pub id: Uuid,
    pub provider: String,
    /// "bookings" or "health".
    pub endpoint_type: Option<String>,
    pub property_id: Option<String>,
    /// Provider's own event id, when present.
    pub event_id: Option<String>,
    /// Canonical dotted event type, e.g. "booking.new".
    pub event_type: String,
    /// External booking/reservation id.
    pub external_id: Option<String>,
    pub revision_id: Option<String>,
    /// Verbatim payload as received.
    pub payload_json: String,
    /// SHA-256 of the canonical (sorted-keys) payload, for dedup.
    pub payload_hash: Option<String>,
    /// Sanitized request headers.
    pub request_headers: Option<String>,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result_action: Option<String>,
    pub result_booking_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// Quarantine status of an unmatched webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedEventStatus {
    Pending,
    Resolved,
    Ignored,
}

impl fmt::Display for UnmatchedEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedEventStatus::Pending => write!(f, "pending"),
            UnmatchedEventStatus::Resolved => write!(f, "resolved"),
            UnmatchedEventStatus::Ignored => write!(f, "ignored"),
        }
    }
}

impl FromStr for UnmatchedEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(UnmatchedEventStatus::Pending),
            "resolved" => Ok(UnmatchedEventStatus::Resolved),
            "ignored" => Ok(UnmatchedEventStatus::Ignored),
            _ => Err(format!("Invalid unmatched event status '{}'", s)),
        }
    }
}

/// Why a webhook payload could not be routed or applied.
///
/// Stable codes; these surface in logs, the admin API and the quarantine
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedEventReason {
    NoConnection,
    NoMapping,
    MissingDates,
    InvalidDateRange,
    DatesInPast,
    DatesTooFar,
    DurationTooShort,
    DurationTooLong,
    InvalidPrice,
    DateConflict,
    MissingGuest,
    InvalidPayload,
}

impl fmt::Display for UnmatchedEventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnmatchedEventReason::NoConnection => "no_connection",
            UnmatchedEventReason::NoMapping => "no_mapping",
            UnmatchedEventReason::MissingDates => "missing_dates",
            UnmatchedEventReason::InvalidDateRange => "invalid_date_range",
            UnmatchedEventReason::DatesInPast => "dates_in_past",
            UnmatchedEventReason::DatesTooFar => "dates_too_far",
            UnmatchedEventReason::DurationTooShort => "duration_too_short",
            UnmatchedEventReason::DurationTooLong => "duration_too_long",
            UnmatchedEventReason::InvalidPrice => "invalid_price",
            UnmatchedEventReason::DateConflict => "date_conflict",
            UnmatchedEventReason::MissingGuest => "missing_guest",
            UnmatchedEventReason::InvalidPayload => "invalid_payload",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for UnmatchedEventReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_connection" => Ok(UnmatchedEventReason::NoConnection),
            "no_mapping" => Ok(UnmatchedEventReason::NoMapping),
            "missing_dates" => Ok(UnmatchedEventReason::MissingDates),
            "invalid_date_range" => Ok(UnmatchedEventReason::InvalidDateRange),
            "dates_in_past" => Ok(UnmatchedEventReason::DatesInPast),
            "dates_too_far" => Ok(UnmatchedEventReason::DatesTooFar),
            "duration_too_short" => Ok(UnmatchedEventReason::DurationTooShort),
            "duration_too_long" => Ok(UnmatchedEventReason::DurationTooLong),
            "invalid_price" => Ok(UnmatchedEventReason::InvalidPrice),
            "date_conflict" => Ok(UnmatchedEventReason::DateConflict),
            "missing_guest" => Ok(UnmatchedEventReason::MissingGuest),
            "invalid_payload" => Ok(UnmatchedEventReason::InvalidPayload),
            _ => Err(format!("Invalid unmatched event reason '{}'", s)),
        }
    }
}

/// Webhook payload that could not be routed or validated. Parked for manual
/// resolution; never dropped.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct UnmatchedWebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_type: String,
    pub external_reservation_id: Option<String>,
    pub property_id: Option<String>,
    pub room_type_id: Option<String>,
    pub rate_plan_id: Option<String>,
    pub raw_payload: serde_json::Value,
    pub reason: String,
    pub status: String,
    pub resolved_booking_id: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// New quarantine row.
#[derive(Debug, Clone)]
pub struct NewUnmatchedEvent {
    pub event_type: String,
    pub external_reservation_id: Option<String>,
    pub property_id: Option<String>,
    pub room_type_id: Option<String>,
    pub rate_plan_id: Option<String>,
    pub raw_payload: serde_json::Value,
    pub reason: UnmatchedEventReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let all = [
            UnmatchedEventReason::NoConnection,
            UnmatchedEventReason::NoMapping,
            UnmatchedEventReason::MissingDates,
            UnmatchedEventReason::InvalidDateRange,
            UnmatchedEventReason::DatesInPast,
            UnmatchedEventReason::DatesTooFar,
            UnmatchedEventReason::DurationTooShort,
            UnmatchedEventReason::DurationTooLong,
            UnmatchedEventReason::InvalidPrice,
            UnmatchedEventReason::DateConflict,
            UnmatchedEventReason::MissingGuest,
            UnmatchedEventReason::InvalidPayload,
        ];
        for reason in all {
            let parsed = UnmatchedEventReason::from_str(&reason.to_string()).unwrap();
            assert_eq!(parsed, reason);
        }
    }

    #[test]
    fn test_webhook_status_round_trip() {
        for s in ["received", "processing", "processed", "failed", "skipped"] {
            assert_eq!(WebhookEventStatus::from_str(s).unwrap().to_string(), s);
        }
    }
}
