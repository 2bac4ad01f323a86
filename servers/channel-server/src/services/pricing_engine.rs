//! Pricing engine.
//!
//! Daily price formula:
//! 1. base = base_weekday_price
//! 2. day_price = base * (1 + weekend_markup/100) on weekend days, else base
//! 3. active discount = intraday bucket by local hour (<16 none, 16..21,
//!    21..23, >=23)
//! 4. final = round_half_up(day_price * (1 - discount/100), 2)
//!
//! Two modes: calendar generation for the channel push uses a fixed 10:00
//! reference hour (no discount); realtime quoting discounts only the current
//! local date of a stay.

use chrono::{Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use db::models::pricing::PricingPolicy;
use db::repositories::PricingPolicyRepository;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sqlx::Error as SqlxError;
use utoipa::ToSchema;
use uuid::Uuid;

/// Reference hour used for calendar generation; before the first discount
/// bucket opens.
const CALENDAR_REFERENCE_HOUR: u32 = 10;

/// Computed price for a single day.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DailyPrice {
    pub date: NaiveDate,
    pub base_price: Decimal,
    /// After weekend markup, before discount.
    pub day_price: Decimal,
    /// After the active discount, rounded half-up to 2 decimals.
    pub final_price: Decimal,
    pub is_weekend: bool,
    pub weekend_markup_applied: Decimal,
    pub discount_applied: Decimal,
    pub discount_bucket: &'static str,
    pub currency: String,
}

/// Multi-night quote with a per-night breakdown.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookingQuote {
    pub unit_id: Uuid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub num_nights: i64,
    pub nights: Vec<DailyPrice>,
    pub total: Decimal,
    pub currency: String,
}

/// Compute the price for one day at a given local hour.
pub fn compute_day_price(policy: &PricingPolicy, date: NaiveDate, local_hour: u32) -> DailyPrice {
    let base_price = policy.base_weekday_price;
    let is_weekend = policy.is_weekend_day(date);

    let (day_price, weekend_markup_applied) = if is_weekend {
        let markup = policy.weekend_markup_percent;
        (base_price * (Decimal::ONE + markup / Decimal::from(100)), markup)
    } else {
        (base_price, Decimal::ZERO)
    };

    let (bucket, discount) = policy.discount_for_hour(local_hour);
    let final_price = if discount > Decimal::ZERO {
        day_price * (Decimal::ONE - discount / Decimal::from(100))
    } else {
        day_price
    };

    DailyPrice {
        date,
        base_price,
        day_price: round_money(day_price),
        final_price: round_money(final_price),
        is_weekend,
        weekend_markup_applied,
        discount_applied: if discount > Decimal::ZERO {
            discount
        } else {
            Decimal::ZERO
        },
        discount_bucket: bucket,
        currency: policy.currency.clone(),
    }
}

/// Round half-up to two decimals.
fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// The policy's timezone, falling back to Asia/Riyadh on a bad name.
fn policy_timezone(policy: &PricingPolicy) -> Tz {
    policy.timezone.parse().unwrap_or(chrono_tz::Asia::Riyadh)
}

/// Today and the current hour in the policy's timezone.
fn local_now(policy: &PricingPolicy) -> (NaiveDate, u32) {
    let tz = policy_timezone(policy);
    let now = tz.from_utc_datetime(&Utc::now().naive_utc());
    (now.date_naive(), now.hour())
}

/// Pricing engine over the policy store.
#[derive(Clone)]
pub struct PricingEngine {
    policies: PricingPolicyRepository,
}

impl PricingEngine {
    pub fn new(policies: PricingPolicyRepository) -> Self {
        Self { policies }
    }

    pub async fn policy_for_unit(&self, unit_id: Uuid) -> Result<Option<PricingPolicy>, SqlxError> {
        self.policies.find_by_unit(unit_id).await
    }

    /// Calendar generation mode: prices over a date range with no intraday
    /// discount, for the channel push.
    pub fn generate_calendar(
        policy: &PricingPolicy,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<DailyPrice> {
        let mut prices = Vec::new();
        let mut date = start;
        while date <= end {
            prices.push(compute_day_price(policy, date, CALENDAR_REFERENCE_HOUR));
            date += Duration::days(1);
        }
        prices
    }

    /// Rates for the channel push: `(date, day_price)` over the horizon,
    /// starting today in the policy's timezone. Empty when the unit has no
    /// policy yet.
    pub async fn prices_for_channel_push(
        &self,
        unit_id: Uuid,
        days_ahead: i64,
    ) -> Result<Vec<(NaiveDate, Decimal)>, SqlxError> {
        let Some(policy) = self.policies.find_by_unit(unit_id).await? else {
            return Ok(Vec::new());
        };

        let (today, _) = local_now(&policy);
        let end = today + Duration::days(days_ahead);
        Ok(Self::generate_calendar(&policy, today, end)
            .into_iter()
            .map(|p| (p.date, p.day_price))
            .collect())
    }

    /// Realtime price with the currently active discount, for same-day
    /// quoting.
    pub async fn realtime_price(
        &self,
        unit_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<Option<DailyPrice>, SqlxError> {
        let Some(policy) = self.policies.find_by_unit(unit_id).await? else {
            return Ok(None);
        };
        let (today, hour) = local_now(&policy);
        Ok(Some(compute_day_price(&policy, date.unwrap_or(today), hour)))
    }

    /// Total for a stay `[check_in, check_out)`. The intraday discount
    /// applies only to the current local date; future nights use the
    /// undiscounted day price.
    pub async fn booking_total(
        &self,
        unit_id: Uuid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Option<BookingQuote>, SqlxError> {
        let Some(policy) = self.policies.find_by_unit(unit_id).await? else {
            return Ok(None);
        };

        let (today, hour) = local_now(&policy);
        Ok(Some(Self::quote_stay(&policy, check_in, check_out, today, hour)))
    }

    /// Pure quoting core, separated for tests.
    pub fn quote_stay(
        policy: &PricingPolicy,
        check_in: NaiveDate,
        check_out: NaiveDate,
        today: NaiveDate,
        current_hour: u32,
    ) -> BookingQuote {
        let mut nights = Vec::new();
        let mut total = Decimal::ZERO;
        let mut date = check_in;
        while date < check_out {
            let hour = if date == today {
                current_hour
            } else {
                CALENDAR_REFERENCE_HOUR
            };
            let night = compute_day_price(policy, date, hour);
            total += night.final_price;
            nights.push(night);
            date += Duration::days(1);
        }

        BookingQuote {
            unit_id: policy.unit_id,
            check_in,
            check_out,
            num_nights: nights.len() as i64,
            currency: policy.currency.clone(),
            nights,
            total: round_money(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use db::models::pricing::discount_bucket;
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

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekday_price_no_discount() {
        // 2030-05-12 is a Sunday: a working day in Saudi Arabia
        let p = compute_day_price(&policy(), date(2030, 5, 12), 10);
        assert_eq!(p.day_price, dec!(100.00));
        assert_eq!(p.final_price, dec!(100.00));
        assert!(!p.is_weekend);
        assert_eq!(p.discount_bucket, discount_bucket::NONE);
    }

    #[test]
    fn test_weekend_markup() {
        // 2030-05-10 is a Friday
        let p = compute_day_price(&policy(), date(2030, 5, 10), 10);
        assert!(p.is_weekend);
        assert_eq!(p.day_price, dec!(120.00));
        assert_eq!(p.final_price, dec!(120.00));
    }

    #[test]
    fn test_intraday_discount_buckets() {
        let pol = policy();
        let d = date(2030, 5, 12);

        assert_eq!(compute_day_price(&pol, d, 15).final_price, dec!(100.00));
        assert_eq!(compute_day_price(&pol, d, 16).final_price, dec!(95.00));
        assert_eq!(compute_day_price(&pol, d, 21).final_price, dec!(90.00));
        assert_eq!(compute_day_price(&pol, d, 23).final_price, dec!(85.00));
    }

    #[test]
    fn test_half_up_rounding() {
        let mut pol = policy();
        pol.base_weekday_price = dec!(99.99);
        pol.discount_16_percent = dec!(5);
        // 99.99 * 0.95 = 94.9905 -> 94.99
        assert_eq!(compute_day_price(&pol, date(2030, 5, 12), 16).final_price, dec!(94.99));

        pol.base_weekday_price = dec!(33.33);
        pol.discount_16_percent = dec!(25);
        // 33.33 * 0.75 = 24.9975 -> 25.00 (half-up)
        assert_eq!(compute_day_price(&pol, date(2030, 5, 12), 16).final_price, dec!(25.00));
    }

    #[test]
    fn test_calendar_mode_ignores_discounts() {
        let pol = policy();
        let prices = PricingEngine::generate_calendar(&pol, date(2030, 5, 9), date(2030, 5, 12));
        assert_eq!(prices.len(), 4);
        // Thu, Fri, Sat, Sun
        assert_eq!(prices[0].day_price, dec!(100.00));
        assert_eq!(prices[1].day_price, dec!(120.00));
        assert_eq!(prices[2].day_price, dec!(120.00));
        assert_eq!(prices[3].day_price, dec!(100.00));
        for p in &prices {
            assert_eq!(p.final_price, p.day_price);
            assert_eq!(p.discount_bucket, discount_bucket::NONE);
        }
    }

    #[test]
    fn test_stay_quote_discounts_today_only() {
        let pol = policy();
        // Sun..Tue stay quoted at 22:00 on the check-in day
        let quote = PricingEngine::quote_stay(
            &pol,
            date(2030, 5, 12),
            date(2030, 5, 14),
            date(2030, 5, 12),
            22,
        );
        assert_eq!(quote.num_nights, 2);
        // Tonight discounted by the 21:00 bucket, tomorrow full price
        assert_eq!(quote.nights[0].final_price, dec!(90.00));
        assert_eq!(quote.nights[1].final_price, dec!(100.00));
        assert_eq!(quote.total, dec!(190.00));
    }

    #[test]
    fn test_stay_quote_future_checkin_no_discount() {
        let pol = policy();
        let quote = PricingEngine::quote_stay(
            &pol,
            date(2030, 5, 13),
            date(2030, 5, 15),
            date(2030, 5, 12),
            23,
        );
        assert_eq!(quote.nights[0].final_price, dec!(100.00));
        assert_eq!(quote.total, dec!(200.00));
    }
}
