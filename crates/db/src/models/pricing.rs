//! Pricing policy model. One policy per unit: base weekday price, weekend
//! markup, and the three intraday discount buckets.

use chrono::{DateTime, NaiveDate, Utc};
use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Intraday discount bucket labels.
pub mod discount_bucket {
    pub const NONE: &str = "none";
    pub const H16: &str = "16";
    pub const H21: &str = "21";
    pub const H23: &str = "23";
}

/// Per-unit pricing policy.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PricingPolicy {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub base_weekday_price: Decimal,
    pub currency: String,
    /// 0..=500.
    pub weekend_markup_percent: Decimal,
    /// Each 0..=100.
    pub discount_16_percent: Decimal,
    pub discount_21_percent: Decimal,
    pub discount_23_percent: Decimal,
    /// IANA timezone name, default "Asia/Riyadh".
    pub timezone: String,
    /// Comma-separated weekday numbers (Monday=0 .. Sunday=6), default "4,5".
    pub weekend_days: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PricingPolicy {
    /// Parse the weekend day list; falls back to Friday/Saturday.
    pub fn weekend_day_numbers(&self) -> Vec<u32> {
        let parsed: Vec<u32> = self
            .weekend_days
            .split(',')
            .filter_map(|d| d.trim().parse().ok())
            .filter(|d| *d <= 6)
            .collect();
        if parsed.is_empty() {
            vec![4, 5]
        } else {
            parsed
        }
    }

    /// Whether the date falls on a weekend per this policy.
    pub fn is_weekend_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().num_days_from_monday();
        self.weekend_day_numbers().contains(&weekday)
    }

    /// Active discount bucket for a local hour of day.
    pub fn discount_for_hour(&self, hour: u32) -> (&'static str, Decimal) {
        if hour >= 23 {
            (discount_bucket::H23, self.discount_23_percent)
        } else if hour >= 21 {
            (discount_bucket::H21, self.discount_21_percent)
        } else if hour >= 16 {
            (discount_bucket::H16, self.discount_16_percent)
        } else {
            (discount_bucket::NONE, Decimal::ZERO)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> PricingPolicy {
        PricingPolicy {
            id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            base_weekday_price: dec!(100),
            currency: "SAR".to_string(),
            weekend_markup_percent: dec!(20),
            discount_16_percent: dec!(5),
            discount_21_percent: dec!(10),
            discount_23_percent: dec!(15),
            timezone: "Asia/Riyadh".to_string(),
            weekend_days: "4,5".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_saudi_weekend() {
        let p = policy();
        // 2030-05-10 is a Friday, 2030-05-11 a Saturday, 2030-05-12 a Sunday
        assert!(p.is_weekend_day(NaiveDate::from_ymd_opt(2030, 5, 10).unwrap()));
        assert!(p.is_weekend_day(NaiveDate::from_ymd_opt(2030, 5, 11).unwrap()));
        assert!(!p.is_weekend_day(NaiveDate::from_ymd_opt(2030, 5, 12).unwrap()));
    }

    #[test]
    fn test_discount_buckets() {
        let p = policy();
        assert_eq!(p.discount_for_hour(9), (discount_bucket::NONE, Decimal::ZERO));
        assert_eq!(p.discount_for_hour(15), (discount_bucket::NONE, Decimal::ZERO));
        assert_eq!(p.discount_for_hour(16), (discount_bucket::H16, dec!(5)));
        assert_eq!(p.discount_for_hour(20), (discount_bucket::H16, dec!(5)));
        assert_eq!(p.discount_for_hour(21), (discount_bucket::H21, dec!(10)));
        assert_eq!(p.discount_for_hour(22), (discount_bucket::H21, dec!(10)));
        assert_eq!(p.discount_for_hour(23), (discount_bucket::H23, dec!(15)));
    }

    #[test]
    fn test_weekend_days_fallback() {
        let mut p = policy();
        p.weekend_days = "".to_string();
        assert_eq!(p.weekend_day_numbers(), vec![4, 5]);
    }
}
