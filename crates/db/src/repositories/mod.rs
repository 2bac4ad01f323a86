//! Database repositories.

pub mod audit;
pub mod booking;
pub mod connection;
pub mod customer;
pub mod idempotency;
pub mod inventory;
pub mod mapping;
pub mod outbox;
pub mod pricing;
pub mod rate_state;
pub mod revision;
pub mod unit;
pub mod unmatched;
pub mod webhook_event;

pub use audit::{AuditRepository, IntegrationLogRepository};
pub use booking::BookingRepository;
pub use connection::ConnectionRepository;
pub use customer::CustomerRepository;
pub use idempotency::InboundIdempotencyRepository;
pub use inventory::InventoryRepository;
pub use mapping::MappingRepository;
pub use outbox::OutboxRepository;
pub use pricing::PricingPolicyRepository;
pub use rate_state::RateStateRepository;
pub use revision::BookingRevisionRepository;
pub use unit::UnitRepository;
pub use unmatched::UnmatchedEventRepository;
pub use webhook_event::WebhookEventRepository;
