//! Channel engine services: pricing, availability, batching, workers,
//! scheduler and health.

pub mod availability;
pub mod batch_builder;
pub mod booking_lifecycle;
pub mod customer_sync;
pub mod health_check;
pub mod outbox_worker;
pub mod pricing_engine;
pub mod scheduler;
pub mod webhook_processor;

pub use availability::AvailabilityProjector;
pub use booking_lifecycle::BookingLifecycle;
pub use customer_sync::CustomerSync;
pub use health_check::HealthService;
pub use outbox_worker::OutboxWorker;
pub use pricing_engine::PricingEngine;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use webhook_processor::{WebhookProcessor, WebhookReceiver};
