//! Application state.

use common::ChannelSettings;
use db::repositories::{
    ConnectionRepository, IntegrationLogRepository, MappingRepository, OutboxRepository,
    PricingPolicyRepository, RateStateRepository, UnmatchedEventRepository, WebhookEventRepository,
};
use db::DbPool;

use crate::services::{
    AvailabilityProjector, HealthService, PricingEngine, WebhookReceiver,
};

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub settings: ChannelSettings,
    pub connection_repo: ConnectionRepository,
    pub mapping_repo: MappingRepository,
    pub outbox_repo: OutboxRepository,
    pub webhook_event_repo: WebhookEventRepository,
    pub unmatched_repo: UnmatchedEventRepository,
    pub pricing_repo: PricingPolicyRepository,
    pub rate_state_repo: RateStateRepository,
    pub integration_log_repo: IntegrationLogRepository,
    pub receiver: WebhookReceiver,
    pub health: HealthService,
    pub pricing: PricingEngine,
    pub availability: AvailabilityProjector,
}

impl AppState {
    pub fn new(db: DbPool, settings: ChannelSettings) -> Self {
        let connection_repo = ConnectionRepository::new(db.clone());
        let mapping_repo = MappingRepository::new(db.clone());
        let outbox_repo = OutboxRepository::new(db.clone());
        let webhook_event_repo = WebhookEventRepository::new(db.clone());
        let unmatched_repo = UnmatchedEventRepository::new(db.clone());
        let pricing_repo = PricingPolicyRepository::new(db.clone());
        let rate_state_repo = RateStateRepository::new(db.clone());
        let integration_log_repo = IntegrationLogRepository::new(db.clone());

        let receiver = WebhookReceiver::new(
            settings.clone(),
            connection_repo.clone(),
            webhook_event_repo.clone(),
        );
        let health = HealthService::new(db.clone(), settings.clone());
        let pricing = PricingEngine::new(pricing_repo.clone());
        let availability = AvailabilityProjector::new(
            db::repositories::UnitRepository::new(db.clone()),
            db::repositories::BookingRepository::new(db.clone()),
        );

        Self {
            db,
            settings,
            connection_repo,
            mapping_repo,
            outbox_repo,
            webhook_event_repo,
            unmatched_repo,
            pricing_repo,
            rate_state_repo,
            integration_log_repo,
            receiver,
            health,
            pricing,
            availability,
        }
    }
}
