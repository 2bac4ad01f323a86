//! Price sync scheduler.
//!
//! Fires at the intraday discount boundaries (00:00, 16:00, 21:00, 23:00
//! channel-local time) and enqueues a price update for every active mapping
//! with a rate plan. Idempotency keys shaped
//! `scheduled_price_<unit>_<YYYYMMDDHH>` make duplicated ticks and worker
//! restarts harmless. The booking lifecycle pass rides the same loop once
//! per hour.

use chrono::{TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use common::ChannelSettings;
use db::models::channel::{NewOutboxEvent, OutboxEventType};
use db::repositories::{ConnectionRepository, MappingRepository, OutboxRepository};
use db::DbPool;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::booking_lifecycle::BookingLifecycle;

/// Scheduler configuration.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Seconds between clock checks.
    pub tick_secs: u64,
    pub enabled: bool,
    /// Local hours at which price syncs fire.
    pub sync_hours: Vec<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            enabled: true,
            sync_hours: vec![0, 16, 21, 23],
        }
    }
}

/// Counters for scheduler activity.
#[derive(Debug, Default, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct SchedulerMetrics {
    pub price_syncs_fired: u64,
    pub events_enqueued: u64,
    pub lifecycle_runs: u64,
    pub errors: u64,
}

/// Result of one price sync tick.
#[derive(Debug, Default)]
pub struct PriceSyncSummary {
    pub connections_checked: usize,
    pub units_enqueued: usize,
    pub errors: Vec<String>,
}

/// Background scheduler. Owns its loop; `start` spawns it, the shutdown
/// signal stops it between units of work.
pub struct Scheduler {
    settings: ChannelSettings,
    connections: ConnectionRepository,
    mappings: MappingRepository,
    outbox: OutboxRepository,
    lifecycle: BookingLifecycle,
    config: SchedulerConfig,
    metrics: Mutex<SchedulerMetrics>,
}

impl Scheduler {
    pub fn new(pool: DbPool, settings: ChannelSettings, config: SchedulerConfig) -> Self {
        Self {
            connections: ConnectionRepository::new(pool.clone()),
            mappings: MappingRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool.clone()),
            lifecycle: BookingLifecycle::new(pool),
            settings,
            config,
            metrics: Mutex::new(SchedulerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn timezone(&self) -> Tz {
        self.settings
            .scheduler_timezone
            .parse()
            .unwrap_or(chrono_tz::Asia::Riyadh)
    }

    /// Spawn the scheduler loop.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                tracing::info!("scheduler disabled");
                return;
            }
            tracing::info!(
                timezone = %self.settings.scheduler_timezone,
                hours = ?self.config.sync_hours,
                "price scheduler started"
            );

            let mut interval = tokio::time::interval(Duration::from_secs(self.config.tick_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut last_price_key: Option<String> = None;
            let mut last_lifecycle_key: Option<String> = None;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(&mut last_price_key, &mut last_lifecycle_key).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One clock check: fire the price sync when entering a sync hour, run
    /// the lifecycle pass once per hour.
    async fn tick(&self, last_price_key: &mut Option<String>, last_lifecycle_key: &mut Option<String>) {
        let tz = self.timezone();
        let now_local = tz.from_utc_datetime(&Utc::now().naive_utc());
        let hour_key = now_local.format("%Y%m%d%H").to_string();

        if self.config.sync_hours.contains(&now_local.hour())
            && last_price_key.as_deref() != Some(hour_key.as_str())
        {
            *last_price_key = Some(hour_key.clone());
            let summary = self.sync_prices_tick(&hour_key).await;
            let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
            metrics.price_syncs_fired += 1;
            metrics.events_enqueued += summary.units_enqueued as u64;
            metrics.errors += summary.errors.len() as u64;
        }

        if last_lifecycle_key.as_deref() != Some(hour_key.as_str()) {
            *last_lifecycle_key = Some(hour_key);
            let summary = self
                .lifecycle
                .run_auto_updates(self.settings.auto_cancel_no_shows)
                .await;
            if !summary.completed.is_empty() || !summary.no_shows_cancelled.is_empty() {
                tracing::info!(
                    completed = summary.completed.len(),
                    no_shows = summary.no_shows_cancelled.len(),
                    "lifecycle pass applied transitions"
                );
            }
            if let Ok(mut metrics) = self.metrics.lock() {
                metrics.lifecycle_runs += 1;
            }
        }
    }

    /// Enqueue a price update for every active mapping with a rate plan.
    pub async fn sync_prices_tick(&self, hour_key: &str) -> PriceSyncSummary {
        let mut summary = PriceSyncSummary::default();

        let connections = match self.connections.list_active().await {
            Ok(connections) => connections,
            Err(e) => {
                summary.errors.push(format!("listing connections: {}", e));
                return summary;
            }
        };
        summary.connections_checked = connections.len();

        for connection in connections {
            let mappings = match self.mappings.list_active_with_rate_plan(connection.id).await {
                Ok(mappings) => mappings,
                Err(e) => {
                    summary
                        .errors
                        .push(format!("listing mappings for {}: {}", connection.id, e));
                    continue;
                }
            };

            for mapping in mappings {
                let key = scheduled_price_key(mapping.unit_id, hour_key);
                match self
                    .outbox
                    .enqueue(NewOutboxEvent {
                        connection_id: connection.id,
                        event_type: OutboxEventType::PriceUpdate,
                        unit_id: mapping.unit_id,
                        days_ahead: self.settings.sync_days,
                        idempotency_key: Some(key),
                    })
                    .await
                {
                    Ok(Some(_)) => summary.units_enqueued += 1,
                    Ok(None) => {
                        // Duplicate tick within the hour; the key already exists
                    }
                    Err(e) => {
                        summary
                            .errors
                            .push(format!("enqueue for unit {}: {}", mapping.unit_id, e));
                    }
                }
            }
        }

        tracing::info!(
            %hour_key,
            connections = summary.connections_checked,
            units = summary.units_enqueued,
            errors = summary.errors.len(),
            "scheduled price sync fired"
        );
        summary
    }
}

/// Idempotency key for a scheduled price sync.
pub fn scheduled_price_key(unit_id: uuid::Uuid, hour_key: &str) -> String {
    format!("scheduled_price_{}_{}", unit_id, hour_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scheduled_price_key_shape() {
        let unit = uuid::Uuid::nil();
        assert_eq!(
            scheduled_price_key(unit, "2030051016"),
            "scheduled_price_00000000-0000-0000-0000-000000000000_2030051016"
        );
    }

    #[test]
    fn test_hour_key_format() {
        let tz: Tz = "Asia/Riyadh".parse().unwrap();
        let local = tz
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2030, 5, 10)
                    .unwrap()
                    .and_hms_opt(16, 0, 1)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(local.format("%Y%m%d%H").to_string(), "2030051016");
    }

    #[test]
    fn test_default_sync_hours_match_discount_boundaries() {
        assert_eq!(SchedulerConfig::default().sync_hours, vec![0, 16, 21, 23]);
    }
}
