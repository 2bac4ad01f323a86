//! Unit read model. Single-inventory: one unit, one key, availability 0 or 1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Manually managed unit status. "booked" is always computed from active
/// bookings, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Available,
    Booked,
    Maintenance,
    NeedsCleaning,
    Hidden,
}

impl UnitStatus {
    /// Manual operational closures. These override computed booking state.
    pub fn is_manual_closure(&self) -> bool {
        matches!(
            self,
            UnitStatus::Maintenance | UnitStatus::NeedsCleaning | UnitStatus::Hidden
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Available => write!(f, "available"),
            UnitStatus::Booked => write!(f, "booked"),
            UnitStatus::Maintenance => write!(f, "maintenance"),
            UnitStatus::NeedsCleaning => write!(f, "needs_cleaning"),
            UnitStatus::Hidden => write!(f, "hidden"),
        }
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(UnitStatus::Available),
            "booked" => Ok(UnitStatus::Booked),
            "maintenance" => Ok(UnitStatus::Maintenance),
            "needs_cleaning" => Ok(UnitStatus::NeedsCleaning),
            "hidden" => Ok(UnitStatus::Hidden),
            _ => Err(format!("Invalid unit status '{}'", s)),
        }
    }
}

/// Unit row (host-owned table; the engine reads these columns and flips
/// `status` to needs_cleaning after checkout).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Unit {
    pub id: Uuid,
    pub project_id: Uuid,
    pub unit_name: String,
    pub status: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_closures() {
        assert!(UnitStatus::Maintenance.is_manual_closure());
        assert!(UnitStatus::NeedsCleaning.is_manual_closure());
        assert!(UnitStatus::Hidden.is_manual_closure());
        assert!(!UnitStatus::Available.is_manual_closure());
        assert!(!UnitStatus::Booked.is_manual_closure());
    }
}
