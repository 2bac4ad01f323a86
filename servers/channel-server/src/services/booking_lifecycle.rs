//! Booking lifecycle automation.
//!
//! Lifecycle: confirmed -> checked_in -> checked_out -> completed, with
//! confirmed -> cancelled. The periodic job completes checked-in stays whose
//! check-out passed and marks their units for cleaning. No-show auto-cancel
//! exists but ships behind a config gate, off by default.

use chrono::Utc;
use db::models::booking::BookingStatus;
use db::models::unit::UnitStatus;
use db::repositories::booking::BookingError;
use db::repositories::{BookingRepository, UnitRepository};
use db::DbPool;
use uuid::Uuid;

/// Summary of one lifecycle pass.
#[derive(Debug, Default, serde::Serialize, utoipa::ToSchema)]
pub struct LifecycleSummary {
    pub completed: Vec<Uuid>,
    pub no_shows_cancelled: Vec<Uuid>,
    pub overdue_check_ins: usize,
}

/// Booking lifecycle service.
#[derive(Clone)]
pub struct BookingLifecycle {
    bookings: BookingRepository,
    units: UnitRepository,
}

impl BookingLifecycle {
    pub fn new(pool: DbPool) -> Self {
        Self {
            bookings: BookingRepository::new(pool.clone()),
            units: UnitRepository::new(pool),
        }
    }

    /// Row-locked, validated status transition.
    pub async fn transition(
        &self,
        booking_id: Uuid,
        next: BookingStatus,
    ) -> Result<db::models::booking::Booking, BookingError> {
        self.bookings.transition_status(booking_id, next).await
    }

    /// Complete checked-in stays whose check-out date passed, marking their
    /// units needs_cleaning.
    pub async fn auto_complete_expired(&self) -> Vec<Uuid> {
        let today = Utc::now().date_naive();
        let expired = match self.bookings.list_expired_checked_in(today).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::error!("failed to list expired check-ins: {}", e);
                return Vec::new();
            }
        };

        let mut completed = Vec::new();
        for booking in expired {
            match self
                .bookings
                .transition_status(booking.id, BookingStatus::Completed)
                .await
            {
                Ok(_) => {
                    completed.push(booking.id);
                    if let Err(e) = self
                        .units
                        .set_status(booking.unit_id, UnitStatus::NeedsCleaning)
                        .await
                    {
                        tracing::warn!(unit_id = %booking.unit_id, "failed to mark unit for cleaning: {}", e);
                    }
                    tracing::info!(
                        booking_id = %booking.id,
                        guest = %booking.guest_name,
                        "auto-completed expired stay"
                    );
                }
                Err(e) => {
                    tracing::error!(booking_id = %booking.id, "auto-complete failed: {}", e);
                }
            }
        }
        completed
    }

    /// Cancel confirmed bookings whose check-out passed without a check-in.
    /// Callers gate this behind `AUTO_CANCEL_NO_SHOWS`.
    pub async fn cancel_no_shows(&self) -> Vec<Uuid> {
        let today = Utc::now().date_naive();
        let no_shows = match self.bookings.list_no_shows(today).await {
            Ok(no_shows) => no_shows,
            Err(e) => {
                tracing::error!("failed to list no-shows: {}", e);
                return Vec::new();
            }
        };

        let mut cancelled = Vec::new();
        for booking in no_shows {
            let note = format!("\n[auto] cancelled as no-show on {}", today);
            match self.bookings.cancel_no_show(booking.id, &note).await {
                Ok(()) => {
                    cancelled.push(booking.id);
                    tracing::info!(booking_id = %booking.id, "auto-cancelled no-show");
                }
                Err(e) => {
                    tracing::error!(booking_id = %booking.id, "no-show cancel failed: {}", e);
                }
            }
        }
        cancelled
    }

    /// One full lifecycle pass.
    pub async fn run_auto_updates(&self, cancel_no_shows: bool) -> LifecycleSummary {
        let completed = self.auto_complete_expired().await;

        let no_shows_cancelled = if cancel_no_shows {
            self.cancel_no_shows().await
        } else {
            Vec::new()
        };

        let today = Utc::now().date_naive();
        let overdue_check_ins = self
            .bookings
            .list_no_shows(today)
            .await
            .map(|b| b.len())
            .unwrap_or(0);
        if overdue_check_ins > 0 {
            tracing::warn!(overdue_check_ins, "confirmed bookings past check-out without check-in");
        }

        LifecycleSummary {
            completed,
            no_shows_cancelled,
            overdue_check_ins,
        }
    }
}
