//! Channel integration settings, loaded from the environment.
//!
//! The server reads configuration once at start-up and passes it explicitly
//! to every component that needs it.

use std::env;

/// Default base URL for the channel manager API (staging and production are
/// selected through `CHANNEL_BASE_URL`).
pub const DEFAULT_CHANNEL_BASE_URL: &str = "https://app.channex.io/api/v1";

/// Settings for the channel integration engine.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// "development" or "production".
    pub environment: String,
    /// Channel manager API base URL.
    pub channel_base_url: String,
    /// Global webhook secret; a per-connection secret overrides it.
    pub webhook_secret: Option<String>,
    /// Comma-separated weekday numbers (Monday=0 .. Sunday=6).
    pub weekend_days: String,
    /// Price+restrictions requests per minute per property.
    pub price_rate_limit: u32,
    /// Availability requests per minute per property.
    pub avail_rate_limit: u32,
    /// Days ahead to push prices and availability.
    pub sync_days: i64,
    /// Max serialized payload size in bytes per outbound request.
    pub max_payload_bytes: usize,
    /// Master switch for the whole integration.
    pub enabled: bool,
    /// Outbox/webhook worker poll interval in seconds.
    pub worker_poll_interval_secs: u64,
    /// Rows claimed per worker tick.
    pub worker_batch_size: i64,
    /// Use FOR UPDATE SKIP LOCKED when claiming rows. Disable for
    /// single-worker deployments on stores without SKIP LOCKED semantics.
    pub worker_skip_locked: bool,
    /// HTTP timeout for channel API calls, in seconds.
    pub http_timeout_secs: u64,
    /// IANA timezone for the price scheduler and intraday discounts.
    pub scheduler_timezone: String,
    /// Auto-cancel confirmed bookings whose check-out passed without a
    /// check-in. Shipped disabled.
    pub auto_cancel_no_shows: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            channel_base_url: DEFAULT_CHANNEL_BASE_URL.to_string(),
            webhook_secret: None,
            weekend_days: "4,5".to_string(),
            price_rate_limit: 10,
            avail_rate_limit: 10,
            sync_days: 365,
            max_payload_bytes: 10_000_000,
            enabled: true,
            worker_poll_interval_secs: 10,
            worker_batch_size: 50,
            worker_skip_locked: true,
            http_timeout_secs: 20,
            scheduler_timezone: "Asia/Riyadh".to_string(),
            auto_cancel_no_shows: false,
        }
    }
}

impl ChannelSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            environment: env_or("ENVIRONMENT", &defaults.environment),
            channel_base_url: env_or("CHANNEL_BASE_URL", &defaults.channel_base_url),
            webhook_secret: env::var("CHANNEL_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            weekend_days: env_or("WEEKEND_DAYS", &defaults.weekend_days),
            price_rate_limit: env_parse("CHANNEL_PRICE_RATE_LIMIT", defaults.price_rate_limit),
            avail_rate_limit: env_parse("CHANNEL_AVAIL_RATE_LIMIT", defaults.avail_rate_limit),
            sync_days: env_parse("CHANNEL_SYNC_DAYS", defaults.sync_days),
            max_payload_bytes: env_parse("CHANNEL_MAX_PAYLOAD_BYTES", defaults.max_payload_bytes),
            enabled: env_parse("CHANNEL_ENABLED", defaults.enabled),
            worker_poll_interval_secs: env_parse(
                "WORKER_POLL_INTERVAL",
                defaults.worker_poll_interval_secs,
            ),
            worker_batch_size: env_parse("WORKER_BATCH_SIZE", defaults.worker_batch_size),
            worker_skip_locked: env_parse("WORKER_SKIP_LOCKED", defaults.worker_skip_locked),
            http_timeout_secs: env_parse("CHANNEL_TIMEOUT_SECONDS", defaults.http_timeout_secs),
            scheduler_timezone: env_or("SCHEDULER_TIMEZONE", &defaults.scheduler_timezone),
            auto_cancel_no_shows: env_parse("AUTO_CANCEL_NO_SHOWS", defaults.auto_cancel_no_shows),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Parse the weekend day list into weekday numbers (Monday=0 .. Sunday=6).
    /// Falls back to the Saudi weekend (Friday, Saturday) on parse failure.
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
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_channel_limits() {
        let s = ChannelSettings::default();
        assert_eq!(s.price_rate_limit, 10);
        assert_eq!(s.avail_rate_limit, 10);
        assert_eq!(s.sync_days, 365);
        assert_eq!(s.max_payload_bytes, 10_000_000);
        assert_eq!(s.scheduler_timezone, "Asia/Riyadh");
        assert!(!s.auto_cancel_no_shows);
    }

    #[test]
    fn test_weekend_day_parsing() {
        let mut s = ChannelSettings::default();
        assert_eq!(s.weekend_day_numbers(), vec![4, 5]);

        s.weekend_days = "5, 6".to_string();
        assert_eq!(s.weekend_day_numbers(), vec![5, 6]);

        // Garbage falls back to the Saudi weekend
        s.weekend_days = "x,y".to_string();
        assert_eq!(s.weekend_day_numbers(), vec![4, 5]);

        // Out-of-range days are dropped
        s.weekend_days = "4,9".to_string();
        assert_eq!(s.weekend_day_numbers(), vec![4]);
    }
}
