//! Availability projector.
//!
//! Derives per-date availability for a unit from its manual status and the
//! set of active bookings. Pure given those inputs; the optional inventory
//! calendar cache is never authoritative.
//!
//! Rules:
//! - Manual maintenance / needs_cleaning / hidden closes **today only**;
//!   future dates stay open. Operational blocks are transient.
//! - Every booking holding inventory closes its half-open `[check_in,
//!   check_out)` range.
//! - The check-out date itself closes as a one-day post-checkout cleaning
//!   buffer.

use chrono::{Duration, NaiveDate, Utc};
use db::models::booking::Booking;
use db::models::unit::UnitStatus;
use db::repositories::{BookingRepository, UnitRepository};
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Projected availability for one date.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DayAvailability {
    pub date: NaiveDate,
    /// 1 when open, 0 when closed (single-inventory units).
    pub availability: i32,
    pub stop_sell: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Projection errors.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Unit not found")]
    UnitNotFound,

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),
}

/// Effective unit status: manual closures win, then active bookings, then
/// available.
pub fn effective_unit_status(
    manual_status: UnitStatus,
    bookings: &[Booking],
    today: NaiveDate,
) -> UnitStatus {
    if manual_status.is_manual_closure() {
        return manual_status;
    }

    let occupied_today = bookings.iter().any(|b| {
        b.status
            .parse::<db::models::booking::BookingStatus>()
            .map(|s| s.blocks_availability())
            .unwrap_or(false)
            && b.check_in_date <= today
            && today <= b.check_out_date
    });

    if occupied_today {
        UnitStatus::Booked
    } else {
        UnitStatus::Available
    }
}

/// Project availability over `[today, today + horizon_days]`.
pub fn project(
    manual_status: UnitStatus,
    bookings: &[Booking],
    today: NaiveDate,
    horizon_days: i64,
) -> Vec<DayAvailability> {
    let end = today + Duration::days(horizon_days);
    let mut days: Vec<DayAvailability> = Vec::with_capacity(horizon_days as usize + 1);
    let mut date = today;
    while date <= end {
        days.push(DayAvailability {
            date,
            availability: 1,
            stop_sell: false,
            reason: None,
        });
        date += Duration::days(1);
    }

    let index_of = |d: NaiveDate| -> Option<usize> {
        if d < today || d > end {
            None
        } else {
            Some((d - today).num_days() as usize)
        }
    };

    let effective = effective_unit_status(manual_status, bookings, today);

    // Manual closures block the current day only
    if effective.is_manual_closure() {
        if let Some(i) = index_of(today) {
            days[i] = DayAvailability {
                date: today,
                availability: 0,
                stop_sell: true,
                reason: Some(format!("unit_status:{}", effective)),
            };
        }
    }

    for booking in bookings {
        let blocks = booking
            .status
            .parse::<db::models::booking::BookingStatus>()
            .map(|s| s.blocks_availability())
            .unwrap_or(false);
        if !blocks {
            continue;
        }

        let mut date = booking.check_in_date.max(today);
        while date < booking.check_out_date {
            if let Some(i) = index_of(date) {
                days[i] = DayAvailability {
                    date,
                    availability: 0,
                    stop_sell: true,
                    reason: Some(format!("booking:{}", booking.id)),
                };
            }
            date += Duration::days(1);
        }

        // One-day cleaning buffer on the check-out date itself
        if let Some(i) = index_of(booking.check_out_date) {
            days[i] = DayAvailability {
                date: booking.check_out_date,
                availability: 0,
                stop_sell: true,
                reason: Some(format!("post_checkout_buffer:{}", booking.id)),
            };
        }
    }

    days
}

/// Availability projector over the unit and booking stores.
#[derive(Clone)]
pub struct AvailabilityProjector {
    units: UnitRepository,
    bookings: BookingRepository,
}

impl AvailabilityProjector {
    pub fn new(units: UnitRepository, bookings: BookingRepository) -> Self {
        Self { units, bookings }
    }

    /// Project availability for a unit over the horizon, starting today.
    pub async fn project_unit(
        &self,
        unit_id: Uuid,
        horizon_days: i64,
    ) -> Result<Vec<DayAvailability>, ProjectionError> {
        let unit = self
            .units
            .find_by_id(unit_id)
            .await?
            .ok_or(ProjectionError::UnitNotFound)?;

        let today = Utc::now().date_naive();
        let bookings = self.bookings.list_active_for_unit(unit_id, today).await?;

        let manual_status = UnitStatus::from_str(&unit.status).unwrap_or(UnitStatus::Available);
        Ok(project(manual_status, &bookings, today, horizon_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::booking::BookingStatus;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn booking(check_in: NaiveDate, check_out: NaiveDate, status: BookingStatus) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            customer_id: None,
            guest_name: "Guest".to_string(),
            guest_phone: None,
            guest_email: None,
            check_in_date: check_in,
            check_out_date: check_out,
            total_price: Decimal::ZERO,
            currency: "SAR".to_string(),
            status: status.to_string(),
            notes: None,
            source_type: "channex".to_string(),
            channel_source: None,
            external_reservation_id: None,
            external_revision_id: None,
            last_applied_revision_id: None,
            last_applied_revision_at: None,
            channel_data: None,
            customer_snapshot: None,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_unit_no_bookings() {
        let today = date(2030, 5, 1);
        let days = project(UnitStatus::Available, &[], today, 6);
        assert_eq!(days.len(), 7);
        assert!(days.iter().all(|d| d.availability == 1 && !d.stop_sell));
    }

    #[test]
    fn test_booking_blocks_half_open_range_plus_buffer() {
        let today = date(2030, 5, 1);
        let b = booking(date(2030, 5, 10), date(2030, 5, 12), BookingStatus::Confirmed);
        let days = project(UnitStatus::Available, &[b.clone()], today, 30);

        let by_date = |d: NaiveDate| days.iter().find(|x| x.date == d).unwrap();
        assert_eq!(by_date(date(2030, 5, 9)).availability, 1);
        assert_eq!(by_date(date(2030, 5, 10)).availability, 0);
        assert_eq!(by_date(date(2030, 5, 11)).availability, 0);
        // Check-out day is closed as the cleaning buffer
        let checkout = by_date(date(2030, 5, 12));
        assert_eq!(checkout.availability, 0);
        assert_eq!(
            checkout.reason.as_deref(),
            Some(format!("post_checkout_buffer:{}", b.id).as_str())
        );
        assert_eq!(by_date(date(2030, 5, 13)).availability, 1);
    }

    #[test]
    fn test_cancelled_bookings_do_not_block() {
        let today = date(2030, 5, 1);
        let b = booking(date(2030, 5, 10), date(2030, 5, 12), BookingStatus::Cancelled);
        let days = project(UnitStatus::Available, &[b], today, 30);
        assert!(days.iter().all(|d| d.availability == 1));
    }

    #[test]
    fn test_manual_closure_blocks_today_only() {
        let today = date(2030, 5, 1);
        let days = project(UnitStatus::Maintenance, &[], today, 10);
        assert_eq!(days[0].availability, 0);
        assert_eq!(days[0].reason.as_deref(), Some("unit_status:maintenance"));
        assert!(days[1..].iter().all(|d| d.availability == 1));
    }

    #[test]
    fn test_effective_status() {
        let today = date(2030, 5, 10);
        let active = booking(date(2030, 5, 9), date(2030, 5, 12), BookingStatus::CheckedIn);

        assert_eq!(
            effective_unit_status(UnitStatus::Available, &[active.clone()], today),
            UnitStatus::Booked
        );
        // Manual closures override bookings
        assert_eq!(
            effective_unit_status(UnitStatus::Maintenance, &[active], today),
            UnitStatus::Maintenance
        );
        assert_eq!(
            effective_unit_status(UnitStatus::Available, &[], today),
            UnitStatus::Available
        );
    }

    #[test]
    fn test_stay_starting_in_past_blocks_remaining_days() {
        let today = date(2030, 5, 11);
        let b = booking(date(2030, 5, 9), date(2030, 5, 13), BookingStatus::CheckedIn);
        let days = project(UnitStatus::Available, &[b], today, 10);
        assert_eq!(days[0].availability, 0); // 11th
        assert_eq!(days[1].availability, 0); // 12th
        assert_eq!(days[2].availability, 0); // 13th: buffer day
        assert_eq!(days[3].availability, 1);
    }
}
