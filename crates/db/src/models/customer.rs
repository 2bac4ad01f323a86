//! Customer model. The engine upserts customers from OTA bookings by
//! normalized phone number.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Customer gender, set only when the payload carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            _ => Err(format!("Invalid gender '{}'", s)),
        }
    }
}

/// Customer row (host-owned table; the engine touches these columns).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    /// Canonical Saudi form `0XXXXXXXXX` where derivable, digits-only
    /// otherwise.
    pub phone: String,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub booking_count: i32,
    pub completed_booking_count: i32,
    pub total_revenue: Decimal,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub is_profile_complete: bool,
    pub notes: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// A profile is complete once we hold a usable name and phone.
    pub fn profile_complete(name: &str, phone: &str) -> bool {
        name.trim().chars().count() >= 2 && phone.trim().len() >= 9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_complete_rule() {
        assert!(Customer::profile_complete("Sara", "0501234567"));
        assert!(Customer::profile_complete("مي", "501234567"));
        assert!(!Customer::profile_complete("S", "0501234567"));
        assert!(!Customer::profile_complete("Sara", "12345"));
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!(Gender::from_str("M").unwrap(), Gender::Male);
        assert_eq!(Gender::from_str("female").unwrap(), Gender::Female);
        assert!(Gender::from_str("other").is_err());
    }
}
