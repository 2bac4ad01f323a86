//! Pricing policy repository.

use crate::models::pricing::PricingPolicy;
use crate::DbPool;
use rust_decimal::Decimal;
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Editable pricing policy fields.
#[derive(Debug, Clone)]
pub struct UpsertPricingPolicy {
    pub unit_id: Uuid,
    pub base_weekday_price: Decimal,
    pub currency: String,
    pub weekend_markup_percent: Decimal,
    pub discount_16_percent: Decimal,
    pub discount_21_percent: Decimal,
    pub discount_23_percent: Decimal,
    pub timezone: String,
    pub weekend_days: String,
}

/// Repository for pricing policy operations.
#[derive(Clone)]
pub struct PricingPolicyRepository {
    pool: DbPool,
}

impl PricingPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_unit(&self, unit_id: Uuid) -> Result<Option<PricingPolicy>, SqlxError> {
        sqlx::query_as::<_, PricingPolicy>("SELECT * FROM pricing_policies WHERE unit_id = $1")
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// One policy per unit; repeated upserts replace the numbers in place.
    pub async fn upsert(&self, data: UpsertPricingPolicy) -> Result<PricingPolicy, SqlxError> {
        sqlx::query_as::<_, PricingPolicy>(
            r#"
            INSERT INTO pricing_policies (
                unit_id, base_weekday_price, currency, weekend_markup_percent,
                discount_16_percent, discount_21_percent, discount_23_percent,
                timezone, weekend_days
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (unit_id) DO UPDATE
            SET base_weekday_price = EXCLUDED.base_weekday_price,
                currency = EXCLUDED.currency,
                weekend_markup_percent = EXCLUDED.weekend_markup_percent,
                discount_16_percent = EXCLUDED.discount_16_percent,
                discount_21_percent = EXCLUDED.discount_21_percent,
                discount_23_percent = EXCLUDED.discount_23_percent,
                timezone = EXCLUDED.timezone,
                weekend_days = EXCLUDED.weekend_days,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(data.unit_id)
        .bind(data.base_weekday_price)
        .bind(&data.currency)
        .bind(data.weekend_markup_percent)
        .bind(data.discount_16_percent)
        .bind(data.discount_21_percent)
        .bind(data.discount_23_percent)
        .bind(&data.timezone)
        .bind(&data.weekend_days)
        .fetch_one(&self.pool)
        .await
    }
}
