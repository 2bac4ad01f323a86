//! Integration health checks.
//!
//! A pure read over configuration, connection state, the latest API call,
//! queue depths and pause state. No check mutates anything.

use chrono::{DateTime, Utc};
use common::ChannelSettings;
use db::repositories::outbox::OutboxCounts;
use db::repositories::webhook_event::WebhookCounts;
use db::repositories::{
    ConnectionRepository, IntegrationLogRepository, OutboxRepository, RateStateRepository,
    WebhookEventRepository,
};
use db::DbPool;
use serde::Serialize;
use utoipa::ToSchema;

/// One health check outcome.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthCheckItem {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// Full health report.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    /// "healthy", "degraded" or "unhealthy".
    pub overall_status: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<HealthCheckItem>,
    pub outbox: OutboxCounts,
    pub webhooks: WebhookCounts,
    pub paused_properties: Vec<String>,
}

/// Health service over the integration stores.
#[derive(Clone)]
pub struct HealthService {
    settings: ChannelSettings,
    connections: ConnectionRepository,
    outbox: OutboxRepository,
    webhooks: WebhookEventRepository,
    logs: IntegrationLogRepository,
    rate_states: RateStateRepository,
}

impl HealthService {
    pub fn new(pool: DbPool, settings: ChannelSettings) -> Self {
        Self {
            connections: ConnectionRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool.clone()),
            webhooks: WebhookEventRepository::new(pool.clone()),
            logs: IntegrationLogRepository::new(pool.clone()),
            rate_states: RateStateRepository::new(pool),
            settings,
        }
    }

    /// Run all checks. Zero failures is healthy, up to two is degraded,
    /// more is unhealthy.
    pub async fn report(&self) -> HealthReport {
        let mut checks = Vec::new();

        checks.push(check(
            "configuration",
            !self.settings.channel_base_url.is_empty(),
            if self.settings.channel_base_url.is_empty() {
                "CHANNEL_BASE_URL is not set".to_string()
            } else {
                format!("base URL {}", self.settings.channel_base_url)
            },
        ));

        checks.push(check(
            "integration_enabled",
            self.settings.enabled,
            if self.settings.enabled {
                "channel integration is enabled".to_string()
            } else {
                "channel integration is DISABLED".to_string()
            },
        ));

        match self.connections.list_active().await {
            Ok(connections) => {
                let error_connections: Vec<_> = connections
                    .iter()
                    .filter(|c| c.error_count > 0)
                    .map(|c| c.id)
                    .collect();
                checks.push(check(
                    "connections",
                    !connections.is_empty() && error_connections.is_empty(),
                    format!(
                        "{} active connection(s), {} with recent errors",
                        connections.len(),
                        error_connections.len()
                    ),
                ));
            }
            Err(e) => checks.push(check("connections", false, format!("query failed: {}", e))),
        }

        match self.logs.latest_api_call_success().await {
            Ok(Some(success)) => checks.push(check(
                "last_api_call",
                success,
                if success {
                    "most recent channel API call succeeded".to_string()
                } else {
                    "most recent channel API call failed".to_string()
                },
            )),
            Ok(None) => checks.push(check(
                "last_api_call",
                true,
                "no channel API calls recorded yet".to_string(),
            )),
            Err(e) => checks.push(check("last_api_call", false, format!("query failed: {}", e))),
        }

        let outbox = self.outbox.status_counts().await.unwrap_or_default();
        checks.push(check(
            "outbox",
            outbox.failed == 0,
            format!(
                "{} pending, {} retrying, {} failed",
                outbox.pending, outbox.retrying, outbox.failed
            ),
        ));

        let webhooks = self.webhooks.status_counts().await.unwrap_or_default();
        checks.push(check(
            "webhooks",
            webhooks.failed == 0,
            format!(
                "{} received, {} processing, {} failed",
                webhooks.received, webhooks.processing, webhooks.failed
            ),
        ));

        let paused_properties: Vec<String> = self
            .rate_states
            .list_paused()
            .await
            .map(|states| states.into_iter().map(|s| s.external_property_id).collect())
            .unwrap_or_default();
        checks.push(check(
            "rate_limits",
            paused_properties.is_empty(),
            if paused_properties.is_empty() {
                "no properties paused".to_string()
            } else {
                format!("{} property(ies) paused after 429s", paused_properties.len())
            },
        ));

        let failed = checks.iter().filter(|c| !c.passed).count();
        let overall_status = match failed {
            0 => "healthy",
            1 | 2 => "degraded",
            _ => "unhealthy",
        };

        HealthReport {
            overall_status: overall_status.to_string(),
            timestamp: Utc::now(),
            checks,
            outbox,
            webhooks,
            paused_properties,
        }
    }
}

fn check(name: &str, passed: bool, message: String) -> HealthCheckItem {
    HealthCheckItem {
        name: name.to_string(),
        passed,
        message,
    }
}
