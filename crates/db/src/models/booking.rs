//! Booking models: the booking row (the columns this engine reads/writes),
//! the per-revision audit row, and status/source mapping.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================
// Status & Source Enums
// ============================================

/// Booking lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Permitted lifecycle transitions.
    ///
    /// confirmed -> checked_in -> checked_out -> completed,
    /// confirmed -> cancelled. A checked-in stay cannot be cancelled.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, Cancelled)
                | (CheckedIn, CheckedOut)
                | (CheckedIn, Completed)
                | (CheckedOut, Completed)
        )
    }

    /// Statuses that hold inventory.
    pub fn blocks_availability(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::CheckedIn => write!(f, "checked_in"),
            BookingStatus::CheckedOut => write!(f, "checked_out"),
            BookingStatus::Completed => write!(f, "completed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "checked_in" => Ok(BookingStatus::CheckedIn),
            "checked_out" => Ok(BookingStatus::CheckedOut),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(format!("Invalid booking status '{}'", s)),
        }
    }
}

/// Map a provider-side status string onto the local lifecycle.
/// Unknown statuses default to confirmed, matching how OTA reservations
/// arrive through the channel.
pub fn map_provider_status(status: Option<&str>) -> BookingStatus {
    let Some(status) = status else {
        return BookingStatus::Confirmed;
    };
    match status.to_lowercase().as_str() {
        "confirmed" | "new" | "reserved" => BookingStatus::Confirmed,
        "cancelled" | "canceled" => BookingStatus::Cancelled,
        "checked_in" | "checkin" => BookingStatus::CheckedIn,
        "checked_out" | "checkout" => BookingStatus::CheckedOut,
        "completed" => BookingStatus::Completed,
        _ => BookingStatus::Confirmed,
    }
}

/// How the booking entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Channex,
    DirectApi,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Manual => write!(f, "manual"),
            SourceType::Channex => write!(f, "channex"),
            SourceType::DirectApi => write!(f, "direct_api"),
        }
    }
}

/// Human-facing OTA label for a channel booking.
pub mod channel_source {
    pub const AIRBNB: &str = "airbnb";
    pub const BOOKING_COM: &str = "booking_com";
    pub const EXPEDIA: &str = "expedia";
    pub const AGODA: &str = "agoda";
    pub const OTHER_OTA: &str = "other_ota";
    pub const CHANNEX: &str = "channex";
}

/// Map an OTA channel name from the webhook payload to a stable label.
pub fn map_channel_source(channel: Option<&str>) -> &'static str {
    let Some(channel) = channel else {
        return channel_source::CHANNEX;
    };
    let lower = channel.to_lowercase();
    if lower.contains("airbnb") {
        channel_source::AIRBNB
    } else if lower.contains("booking.com") || lower == "booking" {
        channel_source::BOOKING_COM
    } else if lower.contains("expedia") {
        channel_source::EXPEDIA
    } else if lower.contains("agoda") {
        channel_source::AGODA
    } else {
        channel_source::OTHER_OTA
    }
}

// ============================================
// Entities
// ============================================

/// Booking row. The engine owns the channel-facing columns; the wider schema
/// belongs to the host system.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Booking {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub guest_name: String,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
    pub check_in_date: NaiveDate,
    /// Exclusive: the guest departs this day.
    pub check_out_date: NaiveDate,
    pub total_price: Decimal,
    pub currency: String,
    pub status: String,
    pub notes: Option<String>,
    pub source_type: String,
    pub channel_source: Option<String>,
    /// Unique when non-null; never regenerated once assigned.
    pub external_reservation_id: Option<String>,
    pub external_revision_id: Option<String>,
    pub last_applied_revision_id: Option<String>,
    pub last_applied_revision_at: Option<DateTime<Utc>>,
    /// Raw provider payload, kept for audit and lazy re-parsing.
    pub channel_data: Option<serde_json::Value>,
    pub customer_snapshot: Option<serde_json::Value>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn nights(&self) -> i64 {
        (self.check_out_date - self.check_in_date).num_days()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled.to_string()
    }
}

/// Booking extracted from a channel webhook, ready to persist.
#[derive(Debug, Clone)]
pub struct NewChannelBooking {
    pub unit_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub guest_name: String,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_price: Decimal,
    pub currency: String,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub channel_source: String,
    pub external_reservation_id: String,
    pub external_revision_id: Option<String>,
    /// The revision's own timestamp; orders later modifications.
    pub revision_timestamp: Option<DateTime<Utc>>,
    pub channel_data: serde_json::Value,
    pub customer_snapshot: serde_json::Value,
}

/// One row per booking revision received from the channel.
/// `applied = false` when the revision was rejected as out-of-order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct BookingRevision {
    pub id: Uuid,
    pub booking_id: Option<Uuid>,
    pub external_booking_id: String,
    pub revision_id: String,
    /// "new", "modification", "cancellation".
    pub event_type: String,
    pub payload: serde_json::Value,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

/// Revision event kinds.
pub mod revision_event {
    pub const NEW: &str = "new";
    pub const MODIFICATION: &str = "modification";
    pub const CANCELLATION: &str = "cancellation";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use BookingStatus::*;
        assert!(Confirmed.can_transition_to(CheckedIn));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(CheckedIn.can_transition_to(CheckedOut));
        assert!(CheckedIn.can_transition_to(Completed));
        assert!(CheckedOut.can_transition_to(Completed));

        // Checked-in stays cannot be cancelled
        assert!(!CheckedIn.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Confirmed));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(map_provider_status(Some("new")), BookingStatus::Confirmed);
        assert_eq!(map_provider_status(Some("canceled")), BookingStatus::Cancelled);
        assert_eq!(map_provider_status(Some("checkin")), BookingStatus::CheckedIn);
        assert_eq!(map_provider_status(None), BookingStatus::Confirmed);
        assert_eq!(map_provider_status(Some("???")), BookingStatus::Confirmed);
    }

    #[test]
    fn test_channel_source_mapping() {
        assert_eq!(map_channel_source(Some("Airbnb")), channel_source::AIRBNB);
        assert_eq!(map_channel_source(Some("booking.com")), channel_source::BOOKING_COM);
        assert_eq!(map_channel_source(Some("booking")), channel_source::BOOKING_COM);
        assert_eq!(map_channel_source(Some("Agoda ME")), channel_source::AGODA);
        assert_eq!(map_channel_source(Some("weird-ota")), channel_source::OTHER_OTA);
        assert_eq!(map_channel_source(None), channel_source::CHANNEX);
    }

    #[test]
    fn test_blocking_statuses() {
        assert!(BookingStatus::Confirmed.blocks_availability());
        assert!(BookingStatus::Pending.blocks_availability());
        assert!(BookingStatus::CheckedIn.blocks_availability());
        assert!(!BookingStatus::Cancelled.blocks_availability());
        assert!(!BookingStatus::Completed.blocks_availability());
    }
}
