//! Inbound webhook pipeline.
//!
//! Fast path ([`WebhookReceiver`]): validate, persist the raw event, answer
//! immediately. Async path ([`WebhookProcessor`]): resolve mapping, dedupe
//! by revision, upsert the booking, push an availability update into the
//! outbox. Unroutable or invalid payloads land in the unmatched-event
//! quarantine with a typed reason; they are never dropped and never retried.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{AppError, ChannelSettings};
use db::models::booking::{
    map_channel_source, map_provider_status, revision_event, NewChannelBooking,
};
use db::models::channel::{
    AuditDirection, AuditEntityType, NewIntegrationAudit, NewOutboxEvent, OutboxEventType,
};
use db::models::webhook::{NewUnmatchedEvent, UnmatchedEventReason, WebhookEventLog};
use db::repositories::webhook_event::NewWebhookEvent;
use db::repositories::{
    AuditRepository, BookingRepository, BookingRevisionRepository, ConnectionRepository,
    InboundIdempotencyRepository, InventoryRepository, MappingRepository, OutboxRepository,
    UnmatchedEventRepository, WebhookEventRepository,
};
use db::DbPool;
use integrations::canonical_payload_hash;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::Error as SqlxError;
use uuid::Uuid;

use super::customer_sync::CustomerSync;

/// The single channel provider this engine speaks to.
pub const PROVIDER: &str = "channex";

/// Hard cap on webhook body size.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 256 * 1024;

/// Shared-secret header on inbound webhooks.
pub const WEBHOOK_TOKEN_HEADER: &str = "x-mnam-webhook-token";

// ============================================
// Payload Parsing
// ============================================

/// Canonical dotted event type from the tolerated wire forms:
/// `event: "booking.new"`, `event_type: "booking.new"`, or the split form
/// `event: "booking", event_type: "new"`.
pub fn canonical_event_type(payload: &Value) -> String {
    let event = payload.get("event").and_then(|v| v.as_str()).unwrap_or("");
    let event_type = payload
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if event.contains('.') {
        event.to_string()
    } else if event_type.contains('.') {
        event_type.to_string()
    } else if !event.is_empty() && !event_type.is_empty() {
        format!("{}.{}", event, event_type)
    } else if !event.is_empty() {
        event.to_string()
    } else if !event_type.is_empty() {
        event_type.to_string()
    } else {
        "unknown".to_string()
    }
}

/// Parse a wire date: `YYYY-MM-DD`, an ISO datetime, or `DD/MM/YYYY`.
pub fn parse_wire_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
        .ok()
}

/// Parse a wire timestamp in the formats the channel emits.
pub fn parse_wire_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    parse_wire_date(raw).map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}

/// Parse a price that may arrive as a JSON string or number.
pub fn parse_wire_decimal(value: &Value) -> Option<Decimal> {
    if let Some(s) = value.as_str() {
        s.trim().parse().ok()
    } else if let Some(n) = value.as_f64() {
        Decimal::try_from(n).ok()
    } else {
        None
    }
}

/// Date and price sanity checks on an inbound booking. Failures map to a
/// typed quarantine reason.
pub fn validate_booking_dates(
    check_in: NaiveDate,
    check_out: NaiveDate,
    total_price: Option<Decimal>,
    today: NaiveDate,
) -> Result<(), (UnmatchedEventReason, String)> {
    if check_out <= check_in {
        return Err((
            UnmatchedEventReason::InvalidDateRange,
            format!("check-out {} must be after check-in {}", check_out, check_in),
        ));
    }

    // Stays that started in the past but are still active are accepted
    if check_out < today {
        return Err((
            UnmatchedEventReason::DatesInPast,
            format!("check-out {} is before today {}", check_out, today),
        ));
    }

    if check_in > today + Duration::days(730) {
        return Err((
            UnmatchedEventReason::DatesTooFar,
            format!("check-in {} is more than 2 years ahead", check_in),
        ));
    }

    let nights = (check_out - check_in).num_days();
    if nights < 1 {
        return Err((
            UnmatchedEventReason::DurationTooShort,
            format!("{} nights (minimum 1)", nights),
        ));
    }
    if nights > 365 {
        return Err((
            UnmatchedEventReason::DurationTooLong,
            format!("{} nights (maximum 365)", nights),
        ));
    }

    if let Some(price) = total_price {
        if price < Decimal::ZERO {
            return Err((
                UnmatchedEventReason::InvalidPrice,
                format!("negative price {}", price),
            ));
        }
        let per_night = price / Decimal::from(nights);
        if per_night > Decimal::from(1_000_000) {
            return Err((
                UnmatchedEventReason::InvalidPrice,
                format!("suspicious price {} for {} nights", price, nights),
            ));
        }
    }

    Ok(())
}

/// Headers stored with the raw event, secrets redacted.
fn sanitize_headers(headers: &HeaderMap) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let key = name.as_str().to_lowercase();
        let redacted = ["token", "secret", "authorization", "api-key", "cookie"]
            .iter()
            .any(|s| key.contains(s));
        let value = if redacted {
            "[REDACTED]".to_string()
        } else {
            value.to_str().unwrap_or("").to_string()
        };
        map.insert(key, Value::String(value));
    }
    serde_json::to_string(&Value::Object(map)).unwrap_or_default()
}

// ============================================
// Receiver (fast path)
// ============================================

/// Receiver response body.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ReceiveOutcome {
    pub ok: bool,
    pub event_id: Option<Uuid>,
    pub already_processed: bool,
}

/// Fast-path webhook receiver: validate, persist, answer. All heavy work
/// happens in the processor.
#[derive(Clone)]
pub struct WebhookReceiver {
    settings: ChannelSettings,
    connections: ConnectionRepository,
    events: WebhookEventRepository,
}

impl WebhookReceiver {
    pub fn new(
        settings: ChannelSettings,
        connections: ConnectionRepository,
        events: WebhookEventRepository,
    ) -> Self {
        Self {
            settings,
            connections,
            events,
        }
    }

    /// Receive a booking webhook. Returns fast; the stored event is picked
    /// up by the processor worker.
    pub async fn receive_booking(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<ReceiveOutcome, AppError> {
        if body.len() > MAX_WEBHOOK_BODY_BYTES {
            return Err(AppError::BadRequest(format!(
                "{} bytes exceeds the {} byte limit",
                body.len(),
                MAX_WEBHOOK_BODY_BYTES
            )));
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON payload: {}", e)))?;

        if payload.get("event").is_none() && payload.get("event_type").is_none() {
            return Err(AppError::BadRequest("missing event field".to_string()));
        }

        let property_id = payload
            .get("property_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        self.verify_secret(headers, property_id.as_deref()).await?;

        let payload_hash = canonical_payload_hash(&payload);
        let event_type = canonical_event_type(&payload);
        let event_id = payload
            .get("id")
            .or_else(|| payload.get("event_id"))
            .or_else(|| payload.get("webhook_id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        // Dedup by provider event id, then by payload hash
        if let Some(event_id) = &event_id {
            if let Some(existing) = self
                .events
                .find_duplicate_by_event_id(PROVIDER, event_id)
                .await
                .map_err(db_err)?
            {
                tracing::info!(%event_id, "duplicate webhook event, skipping");
                return Ok(ReceiveOutcome {
                    ok: true,
                    event_id: Some(existing.id),
                    already_processed: true,
                });
            }
        }
        if let Some(existing) = self
            .events
            .find_duplicate_by_hash(PROVIDER, &payload_hash)
            .await
            .map_err(db_err)?
        {
            tracing::info!(hash = %payload_hash, "duplicate webhook payload, skipping");
            return Ok(ReceiveOutcome {
                ok: true,
                event_id: Some(existing.id),
                already_processed: true,
            });
        }

        let data = payload
            .get("data")
            .or_else(|| payload.get("payload"))
            .cloned()
            .unwrap_or(Value::Null);
        let external_id = data
            .get("id")
            .or_else(|| data.get("reservation_id"))
            .or_else(|| data.get("booking_id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let revision_id = data
            .get("revision_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let stored = self
            .events
            .insert(NewWebhookEvent {
                provider: PROVIDER.to_string(),
                endpoint_type: Some("bookings".to_string()),
                property_id,
                event_id,
                event_type: event_type.clone(),
                external_id,
                revision_id,
                payload_json: String::from_utf8_lossy(body).to_string(),
                payload_hash,
                request_headers: Some(sanitize_headers(headers)),
            })
            .await
            .map_err(db_err)?;

        tracing::info!(%event_type, event_log_id = %stored.id, "webhook received");

        Ok(ReceiveOutcome {
            ok: true,
            event_id: Some(stored.id),
            already_processed: false,
        })
    }

    /// Constant-time shared-secret check. A per-connection secret overrides
    /// the global one; without any configured secret the check passes.
    async fn verify_secret(
        &self,
        headers: &HeaderMap,
        property_id: Option<&str>,
    ) -> Result<(), AppError> {
        let connection_secret = match property_id {
            Some(pid) => self
                .connections
                .find_active_by_property(PROVIDER, pid)
                .await
                .map_err(db_err)?
                .and_then(|c| c.webhook_secret),
            None => None,
        };

        let Some(secret) = connection_secret.or_else(|| self.settings.webhook_secret.clone())
        else {
            return Ok(());
        };

        let token = headers
            .get(WEBHOOK_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if integrations::constant_time_compare(token, &secret) {
            Ok(())
        } else {
            tracing::warn!("webhook rejected: bad shared secret");
            Err(AppError::Unauthorized("invalid webhook token".to_string()))
        }
    }
}

fn db_err(e: SqlxError) -> AppError {
    AppError::Database(e.to_string())
}

// ============================================
// Processor (async path)
// ============================================

/// Result of processing one stored webhook event.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub success: bool,
    pub action: String,
    pub booking_id: Option<Uuid>,
    pub error: Option<String>,
}

impl ProcessResult {
    fn ok(action: &str, booking_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            booking_id,
            error: None,
        }
    }
}

/// Fields shared by the booking handlers.
struct BookingPayload {
    data: Value,
    property_id: Option<String>,
    reservation_id: Option<String>,
    room_type_id: Option<String>,
    rate_plan_id: Option<String>,
    revision_id: Option<String>,
    revision_timestamp: Option<DateTime<Utc>>,
    guest_name: String,
    guest_phone: Option<String>,
    guest_email: Option<String>,
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
    total_price: Option<Decimal>,
    currency: String,
}

impl BookingPayload {
    fn extract(payload: &Value) -> Self {
        let data = payload
            .get("data")
            .or_else(|| payload.get("payload"))
            .cloned()
            .unwrap_or(Value::Null);

        let str_field = |v: &Value, keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| v.get(*k).and_then(|x| x.as_str()))
                .map(|s| s.to_string())
        };

        let property_id = str_field(payload, &["property_id"])
            .or_else(|| str_field(&data, &["property_id"]));
        let reservation_id = str_field(&data, &["id", "reservation_id", "booking_id"]);
        let room_type_id = str_field(&data, &["room_type_id"]);
        let rate_plan_id = str_field(&data, &["rate_plan_id"]);
        let revision_id = str_field(&data, &["revision_id"]);
        let revision_timestamp = str_field(&data, &["updated_at", "timestamp"])
            .and_then(|s| parse_wire_datetime(&s));

        let guest = data
            .get("guest")
            .or_else(|| data.get("customer"))
            .cloned()
            .unwrap_or(Value::Null);
        let guest_name = str_field(&guest, &["name", "full_name"])
            .or_else(|| {
                let first = str_field(&guest, &["first_name"]).unwrap_or_default();
                let last = str_field(&guest, &["last_name"]).unwrap_or_default();
                let full = format!("{} {}", first, last).trim().to_string();
                if full.is_empty() {
                    None
                } else {
                    Some(full)
                }
            })
            .unwrap_or_else(|| "OTA Guest".to_string());
        let guest_phone = str_field(&guest, &["phone"]);
        let guest_email = str_field(&guest, &["email"]);

        let check_in = str_field(&data, &["arrival_date", "check_in"])
            .and_then(|s| parse_wire_date(&s));
        let check_out = str_field(&data, &["departure_date", "check_out"])
            .and_then(|s| parse_wire_date(&s));

        let total_price = data
            .get("total_price")
            .or_else(|| data.get("amount"))
            .and_then(parse_wire_decimal);
        let currency = str_field(&data, &["currency"]).unwrap_or_else(|| "SAR".to_string());

        Self {
            data,
            property_id,
            reservation_id,
            room_type_id,
            rate_plan_id,
            revision_id,
            revision_timestamp,
            guest_name,
            guest_phone,
            guest_email,
            check_in,
            check_out,
            total_price,
            currency,
        }
    }

    fn guest_snapshot(&self) -> Value {
        serde_json::json!({
            "name": self.guest_name,
            "phone": self.guest_phone,
            "email": self.guest_email,
            "country": self.data.get("guest").and_then(|g| g.get("country")).cloned(),
        })
    }
}

/// Async webhook processor worker.
#[derive(Clone)]
pub struct WebhookProcessor {
    pool: DbPool,
    settings: ChannelSettings,
    events: WebhookEventRepository,
    connections: ConnectionRepository,
    mappings: MappingRepository,
    bookings: BookingRepository,
    revisions: BookingRevisionRepository,
    customers: CustomerSync,
    unmatched: UnmatchedEventRepository,
    idempotency: InboundIdempotencyRepository,
    outbox: OutboxRepository,
    inventory: InventoryRepository,
    audit: AuditRepository,
}

impl WebhookProcessor {
    pub fn new(pool: DbPool, settings: ChannelSettings) -> Self {
        Self {
            events: WebhookEventRepository::new(pool.clone()),
            connections: ConnectionRepository::new(pool.clone()),
            mappings: MappingRepository::new(pool.clone()),
            bookings: BookingRepository::new(pool.clone()),
            revisions: BookingRevisionRepository::new(pool.clone()),
            customers: CustomerSync::new(db::repositories::CustomerRepository::new(pool.clone())),
            unmatched: UnmatchedEventRepository::new(pool.clone()),
            idempotency: InboundIdempotencyRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool.clone()),
            inventory: InventoryRepository::new(pool.clone()),
            audit: AuditRepository::new(pool.clone()),
            pool,
            settings,
        }
    }

    /// Poll loop; same shape as the outbox worker. Checks the shutdown
    /// signal between units of work.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.worker_poll_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (succeeded, failed) =
                        self.run_once(self.settings.worker_batch_size).await;
                    if succeeded + failed > 0 {
                        tracing::debug!(succeeded, failed, "webhook tick complete");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("webhook processor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and process one batch. Returns (succeeded, failed).
    pub async fn run_once(&self, limit: i64) -> (usize, usize) {
        let events = match self
            .events
            .claim_received(limit, self.settings.worker_skip_locked)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("failed to claim webhook events: {}", e);
                return (0, 0);
            }
        };

        let mut succeeded = 0;
        let mut failed = 0;
        for event in events {
            let result = self.process_event(&event).await;
            if result.success {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        (succeeded, failed)
    }

    /// Process one claimed event and record the outcome on its log row.
    pub async fn process_event(&self, event: &WebhookEventLog) -> ProcessResult {
        let payload: Value = match serde_json::from_str(&event.payload_json) {
            Ok(payload) => payload,
            Err(e) => {
                let error = format!("unparseable payload: {}", e);
                let _ = self.events.mark_failed(event.id, &error).await;
                return ProcessResult {
                    success: false,
                    action: "error".to_string(),
                    booking_id: None,
                    error: Some(error),
                };
            }
        };

        // Stored event types from older receivers may lack the dot form
        let event_type = if event.event_type.contains('.') {
            event.event_type.clone()
        } else {
            canonical_event_type(&payload)
        };

        let outcome = match event_type.as_str() {
            "booking.new" | "booking_created" => self.handle_booking_new(&payload, event).await,
            "booking.modified" | "booking_updated" => {
                self.handle_booking_modified(&payload, event).await
            }
            "booking.cancelled" | "booking_cancelled" => {
                self.handle_booking_cancelled(&payload, event).await
            }
            other => {
                tracing::info!(event_type = other, event_log_id = %event.id, "ignoring event type");
                let _ = self.events.mark_skipped(event.id, "ignored").await;
                return ProcessResult::ok("ignored", None);
            }
        };

        match outcome {
            Ok(result) => {
                let _ = self
                    .events
                    .mark_processed(event.id, &result.action, result.booking_id)
                    .await;
                self.record_audit(event, &result).await;
                result
            }
            Err(e) => {
                let error = e.to_string();
                tracing::error!(event_log_id = %event.id, "webhook processing failed: {}", error);
                let _ = self.events.mark_failed(event.id, &error).await;
                ProcessResult {
                    success: false,
                    action: "error".to_string(),
                    booking_id: None,
                    error: Some(error),
                }
            }
        }
    }

    // ==================== booking.new ====================

    async fn handle_booking_new(
        &self,
        payload: &Value,
        event: &WebhookEventLog,
    ) -> Result<ProcessResult, SqlxError> {
        let extracted = BookingPayload::extract(payload);

        let Some(property_id) = extracted.property_id.clone() else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::InvalidPayload)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        };

        let Some(connection) = self
            .connections
            .find_active_by_property(PROVIDER, &property_id)
            .await?
        else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::NoConnection)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        };

        let Some(reservation_id) = extracted.reservation_id.clone() else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::InvalidPayload)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        };

        // Resolve the unit: room type first, rate plan as fallback
        let mut mapping = None;
        if let Some(room_type_id) = &extracted.room_type_id {
            mapping = self
                .mappings
                .find_active_by_room_type(connection.id, room_type_id)
                .await?;
        }
        if mapping.is_none() {
            if let Some(rate_plan_id) = &extracted.rate_plan_id {
                mapping = self
                    .mappings
                    .find_active_by_rate_plan(connection.id, rate_plan_id)
                    .await?;
            }
        }
        let Some(mapping) = mapping else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::NoMapping)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        };
        let unit_id = mapping.unit_id;

        let (Some(check_in), Some(check_out)) = (extracted.check_in, extracted.check_out) else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::MissingDates)
                .await?;
            return Ok(ProcessResult::ok("validation_failed", None));
        };

        let today = Utc::now().date_naive();
        if let Err((reason, message)) =
            validate_booking_dates(check_in, check_out, extracted.total_price, today)
        {
            tracing::warn!(
                %reservation_id,
                reason = %reason,
                "booking validation failed: {}",
                message
            );
            self.quarantine(payload, &extracted, reason).await?;
            return Ok(ProcessResult::ok("validation_failed", None));
        }

        let mut tx = self.pool.begin().await?;

        // Re-delivery: the reservation already exists
        if let Some(existing) = self
            .bookings
            .find_by_external_for_update(&mut tx, &reservation_id)
            .await?
        {
            tx.commit().await?;
            return Ok(ProcessResult::ok("skipped", Some(existing.id)));
        }

        // Lock the unit before the overlap check
        if !self.bookings.lock_unit(&mut tx, unit_id).await? {
            drop(tx);
            self.quarantine(payload, &extracted, UnmatchedEventReason::NoMapping)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        }

        if let Some(conflict) = self
            .bookings
            .find_conflict(&mut tx, unit_id, check_in, check_out, Some(&reservation_id))
            .await?
        {
            drop(tx);
            tracing::warn!(
                %reservation_id,
                conflicting_booking = %conflict.id,
                "date conflict on unit {}",
                unit_id
            );
            self.quarantine(payload, &extracted, UnmatchedEventReason::DateConflict)
                .await?;
            return Ok(ProcessResult::ok("conflict", None));
        }

        let total_price = extracted.total_price.unwrap_or(Decimal::ZERO);
        let customer = self
            .customers
            .upsert_from_booking(
                &mut tx,
                &extracted.guest_name,
                extracted.guest_phone.as_deref(),
                extracted.guest_email.as_deref(),
                None,
                total_price,
            )
            .await?;

        let channel = extracted
            .data
            .get("ota_name")
            .or_else(|| extracted.data.get("channel"))
            .and_then(|v| v.as_str());
        let channel_source = map_channel_source(channel);

        let booking = self
            .bookings
            .insert_channel_booking(
                &mut tx,
                &NewChannelBooking {
                    unit_id,
                    customer_id: customer.as_ref().map(|c| c.customer.id),
                    guest_name: extracted.guest_name.clone(),
                    guest_phone: extracted.guest_phone.clone(),
                    guest_email: extracted.guest_email.clone(),
                    check_in_date: check_in,
                    check_out_date: check_out,
                    total_price,
                    currency: extracted.currency.clone(),
                    status: map_provider_status(
                        extracted.data.get("status").and_then(|v| v.as_str()),
                    ),
                    notes: Some(format!(
                        "OTA Booking via {}",
                        channel.unwrap_or(PROVIDER)
                    )),
                    channel_source: channel_source.to_string(),
                    external_reservation_id: reservation_id.clone(),
                    external_revision_id: extracted.revision_id.clone(),
                    revision_timestamp: extracted.revision_timestamp,
                    channel_data: extracted.data.clone(),
                    customer_snapshot: extracted.guest_snapshot(),
                },
            )
            .await?;

        if let Some(revision_id) = &extracted.revision_id {
            self.revisions
                .insert(
                    &mut tx,
                    Some(booking.id),
                    &reservation_id,
                    revision_id,
                    revision_event::NEW,
                    &extracted.data,
                    true,
                )
                .await?;
        }

        self.inventory
            .mark_dates_booked(&mut tx, unit_id, booking.id, check_in, check_out)
            .await?;

        self.record_idempotency(&mut tx, event, &reservation_id, &extracted, "created", Some(booking.id))
            .await?;

        tx.commit().await?;

        self.enqueue_avail_update(connection.id, unit_id, event.id).await;

        tracing::info!(
            booking_id = %booking.id,
            %reservation_id,
            "created booking from channel reservation"
        );
        Ok(ProcessResult::ok("created", Some(booking.id)))
    }

    // ==================== booking.modified ====================

    async fn handle_booking_modified(
        &self,
        payload: &Value,
        event: &WebhookEventLog,
    ) -> Result<ProcessResult, SqlxError> {
        let extracted = BookingPayload::extract(payload);

        let Some(reservation_id) = extracted.reservation_id.clone() else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::InvalidPayload)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        };

        // Revision dedup happens before any locking
        if let Some(revision_id) = &extracted.revision_id {
            if self.revisions.exists(&reservation_id, revision_id).await? {
                tracing::info!(%reservation_id, %revision_id, "revision already applied");
                let booking = self.bookings.find_by_external(&reservation_id).await?;
                return Ok(ProcessResult::ok("skipped", booking.map(|b| b.id)));
            }
        }

        let mut tx = self.pool.begin().await?;

        let Some(booking) = self
            .bookings
            .find_by_external_for_update(&mut tx, &reservation_id)
            .await?
        else {
            // Unknown booking: upsert through the new-booking path
            drop(tx);
            tracing::info!(%reservation_id, "modified event for unknown booking, upserting");
            return self.handle_booking_new(payload, event).await;
        };

        // Out-of-order: a revision older than the applied one is recorded
        // but never mutates the booking
        let out_of_order = match (extracted.revision_timestamp, booking.last_applied_revision_at) {
            (Some(incoming), Some(applied)) => incoming < applied,
            _ => false,
        };

        if out_of_order {
            if let Some(revision_id) = &extracted.revision_id {
                self.revisions
                    .insert(
                        &mut tx,
                        Some(booking.id),
                        &reservation_id,
                        revision_id,
                        revision_event::MODIFICATION,
                        &extracted.data,
                        false,
                    )
                    .await?;
            }
            tx.commit().await?;
            tracing::warn!(
                %reservation_id,
                booking_id = %booking.id,
                "out-of-order revision recorded, booking untouched"
            );
            return Ok(ProcessResult::ok("skipped_out_of_order", Some(booking.id)));
        }

        let old_check_in = booking.check_in_date;
        let old_check_out = booking.check_out_date;
        let dates_changed = extracted
            .check_in
            .map(|d| d != old_check_in)
            .unwrap_or(false)
            || extracted
                .check_out
                .map(|d| d != old_check_out)
                .unwrap_or(false);

        // Guest fields only overwrite when the payload carries a value
        let update = db::repositories::booking::BookingRevisionUpdate {
            guest_name: non_empty(extracted.guest_name.clone())
                .filter(|n| n != "OTA Guest"),
            guest_phone: extracted.guest_phone.clone().and_then(non_empty),
            guest_email: extracted.guest_email.clone().and_then(non_empty),
            check_in_date: extracted.check_in,
            check_out_date: extracted.check_out,
            total_price: extracted.total_price,
            currency: non_empty(extracted.currency.clone()),
            status: extracted
                .data
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| map_provider_status(Some(s))),
            revision_id: extracted.revision_id.clone(),
            revision_timestamp: extracted.revision_timestamp,
            channel_data: Some(extracted.data.clone()),
        };

        let updated = self.bookings.apply_revision(&mut tx, booking.id, &update).await?;

        if let Some(revision_id) = &extracted.revision_id {
            self.revisions
                .insert(
                    &mut tx,
                    Some(booking.id),
                    &reservation_id,
                    revision_id,
                    revision_event::MODIFICATION,
                    &extracted.data,
                    true,
                )
                .await?;
        }

        if dates_changed {
            self.inventory
                .apply_booking_change(
                    &mut tx,
                    updated.unit_id,
                    updated.id,
                    booking.unit_id,
                    old_check_in,
                    old_check_out,
                    updated.check_in_date,
                    updated.check_out_date,
                )
                .await?;
        }

        self.record_idempotency(&mut tx, event, &reservation_id, &extracted, "updated", Some(updated.id))
            .await?;

        tx.commit().await?;

        if dates_changed {
            if let Some(property_id) = &extracted.property_id {
                if let Some(connection) = self
                    .connections
                    .find_active_by_property(PROVIDER, property_id)
                    .await?
                {
                    self.enqueue_avail_update(connection.id, updated.unit_id, event.id)
                        .await;
                }
            }
        }

        tracing::info!(
            booking_id = %updated.id,
            revision_id = ?extracted.revision_id,
            "applied booking modification"
        );
        Ok(ProcessResult::ok("updated", Some(updated.id)))
    }

    // ==================== booking.cancelled ====================

    async fn handle_booking_cancelled(
        &self,
        payload: &Value,
        event: &WebhookEventLog,
    ) -> Result<ProcessResult, SqlxError> {
        let extracted = BookingPayload::extract(payload);

        let Some(reservation_id) = extracted.reservation_id.clone() else {
            self.quarantine(payload, &extracted, UnmatchedEventReason::InvalidPayload)
                .await?;
            return Ok(ProcessResult::ok("unmatched", None));
        };

        let mut tx = self.pool.begin().await?;

        let Some(booking) = self
            .bookings
            .find_by_external_for_update(&mut tx, &reservation_id)
            .await?
        else {
            self.record_idempotency(&mut tx, event, &reservation_id, &extracted, "not_found", None)
                .await?;
            tx.commit().await?;
            return Ok(ProcessResult::ok("not_found", None));
        };

        let note = format!("\nCancelled via channel on {}", Utc::now().to_rfc3339());
        let cancelled = self
            .bookings
            .cancel_from_channel(&mut tx, booking.id, extracted.revision_id.as_deref(), &note)
            .await?;

        if let Some(revision_id) = &extracted.revision_id {
            self.revisions
                .insert(
                    &mut tx,
                    Some(booking.id),
                    &reservation_id,
                    revision_id,
                    revision_event::CANCELLATION,
                    &extracted.data,
                    true,
                )
                .await?;
        }

        self.inventory
            .apply_cancellation(
                &mut tx,
                booking.unit_id,
                booking.id,
                booking.check_in_date,
                booking.check_out_date,
            )
            .await?;

        self.record_idempotency(
            &mut tx,
            event,
            &reservation_id,
            &extracted,
            "cancelled",
            Some(booking.id),
        )
        .await?;

        tx.commit().await?;

        if let Some(property_id) = &extracted.property_id {
            if let Some(connection) = self
                .connections
                .find_active_by_property(PROVIDER, property_id)
                .await?
            {
                self.enqueue_avail_update(connection.id, booking.unit_id, event.id)
                    .await;
            }
        }

        tracing::info!(booking_id = %cancelled.id, %reservation_id, "cancelled booking from channel");
        Ok(ProcessResult::ok("cancelled", Some(cancelled.id)))
    }

    // ==================== Shared plumbing ====================

    async fn quarantine(
        &self,
        payload: &Value,
        extracted: &BookingPayload,
        reason: UnmatchedEventReason,
    ) -> Result<(), SqlxError> {
        self.unmatched
            .save(
                PROVIDER,
                NewUnmatchedEvent {
                    event_type: canonical_event_type(payload),
                    external_reservation_id: extracted.reservation_id.clone(),
                    property_id: extracted.property_id.clone(),
                    room_type_id: extracted.room_type_id.clone(),
                    rate_plan_id: extracted.rate_plan_id.clone(),
                    raw_payload: payload.clone(),
                    reason,
                },
            )
            .await?;
        Ok(())
    }

    async fn record_idempotency(
        &self,
        conn: &mut sqlx::PgConnection,
        event: &WebhookEventLog,
        reservation_id: &str,
        extracted: &BookingPayload,
        action: &str,
        booking_id: Option<Uuid>,
    ) -> Result<(), SqlxError> {
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| format!("evt_{}", event.id));
        self.idempotency
            .record(
                conn,
                PROVIDER,
                &event_id,
                Some(reservation_id),
                extracted.revision_id.as_deref(),
                action,
                booking_id,
            )
            .await
    }

    /// Push an availability update for the unit into the outbox. Keyed per
    /// webhook event so reprocessing does not duplicate work.
    async fn enqueue_avail_update(&self, connection_id: Uuid, unit_id: Uuid, event_log_id: Uuid) {
        let result = self
            .outbox
            .enqueue(NewOutboxEvent {
                connection_id,
                event_type: OutboxEventType::AvailUpdate,
                unit_id,
                days_ahead: self.settings.sync_days,
                idempotency_key: Some(format!("webhook_avail_{}_{}", unit_id, event_log_id)),
            })
            .await;
        if let Err(e) = result {
            tracing::error!(unit_id = %unit_id, "failed to enqueue availability update: {}", e);
        }
    }

    async fn record_audit(&self, event: &WebhookEventLog, result: &ProcessResult) {
        let audit = NewIntegrationAudit {
            connection_id: None,
            direction: AuditDirection::Inbound,
            entity_type: AuditEntityType::Booking,
            external_id: event.external_id.clone(),
            unit_id: None,
            payload_hash: event.payload_hash.clone(),
            payload_size_bytes: Some(event.payload_json.len() as i32),
            date_from: None,
            date_to: None,
            records_count: Some(1),
            status: if result.success { "success" } else { "failed" }.to_string(),
            error_message: result.error.clone(),
            retry_count: 0,
            duration_ms: None,
            request_id: Some(event.id.to_string()),
        };
        if let Err(e) = self.audit.record(audit).await {
            tracing::warn!("failed to write inbound audit row: {}", e);
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_canonical_event_type_forms() {
        assert_eq!(canonical_event_type(&json!({"event": "booking.new"})), "booking.new");
        assert_eq!(
            canonical_event_type(&json!({"event_type": "booking.new"})),
            "booking.new"
        );
        assert_eq!(
            canonical_event_type(&json!({"event": "booking", "event_type": "new"})),
            "booking.new"
        );
        assert_eq!(canonical_event_type(&json!({"event": "booking_created"})), "booking_created");
        assert_eq!(canonical_event_type(&json!({})), "unknown");
    }

    #[test]
    fn test_parse_wire_date_formats() {
        assert_eq!(parse_wire_date("2030-05-10"), Some(date(2030, 5, 10)));
        assert_eq!(parse_wire_date("2030-05-10T14:00:00Z"), Some(date(2030, 5, 10)));
        assert_eq!(parse_wire_date("10/05/2030"), Some(date(2030, 5, 10)));
        assert_eq!(parse_wire_date("not-a-date"), None);
    }

    #[test]
    fn test_parse_wire_datetime_formats() {
        assert!(parse_wire_datetime("2030-05-01T10:00:00Z").is_some());
        assert!(parse_wire_datetime("2030-05-01T10:00:00.123Z").is_some());
        assert!(parse_wire_datetime("2030-05-01T10:00:00").is_some());
        assert!(parse_wire_datetime("2030-05-01 10:00:00").is_some());
        assert!(parse_wire_datetime("2030-05-01").is_some());
        assert!(parse_wire_datetime("garbage").is_none());
    }

    #[test]
    fn test_parse_wire_decimal() {
        use rust_decimal_macros::dec;
        assert_eq!(parse_wire_decimal(&json!("400.00")), Some(dec!(400.00)));
        assert_eq!(parse_wire_decimal(&json!(400.5)), Some(dec!(400.5)));
        assert_eq!(parse_wire_decimal(&json!(null)), None);
        assert_eq!(parse_wire_decimal(&json!("abc")), None);
    }

    #[test]
    fn test_validate_booking_dates_rules() {
        let today = date(2030, 5, 1);

        assert!(validate_booking_dates(date(2030, 5, 10), date(2030, 5, 12), None, today).is_ok());

        // Started in the past, still active: accepted
        assert!(validate_booking_dates(date(2030, 4, 28), date(2030, 5, 3), None, today).is_ok());

        let err = |ci, co, price| {
            validate_booking_dates(ci, co, price, today)
                .unwrap_err()
                .0
        };
        assert_eq!(
            err(date(2030, 5, 12), date(2030, 5, 10), None),
            UnmatchedEventReason::InvalidDateRange
        );
        assert_eq!(
            err(date(2030, 4, 1), date(2030, 4, 5), None),
            UnmatchedEventReason::DatesInPast
        );
        assert_eq!(
            err(date(2033, 1, 1), date(2033, 1, 5), None),
            UnmatchedEventReason::DatesTooFar
        );
        assert_eq!(
            err(date(2030, 5, 10), date(2032, 5, 20), None),
            UnmatchedEventReason::DurationTooLong
        );
        assert_eq!(
            err(
                date(2030, 5, 10),
                date(2030, 5, 12),
                Some(rust_decimal_macros::dec!(-1))
            ),
            UnmatchedEventReason::InvalidPrice
        );
        assert_eq!(
            err(
                date(2030, 5, 10),
                date(2030, 5, 12),
                Some(rust_decimal_macros::dec!(5000000))
            ),
            UnmatchedEventReason::InvalidPrice
        );
    }

    #[test]
    fn test_extract_booking_payload() {
        let payload = json!({
            "event": "booking.new",
            "property_id": "P1",
            "data": {
                "id": "R1",
                "room_type_id": "RT1",
                "rate_plan_id": "RP1",
                "guest": {"name": "Sara", "phone": "+966501234567"},
                "arrival_date": "2030-05-10",
                "departure_date": "2030-05-12",
                "total_price": "400.00",
                "currency": "SAR",
                "revision_id": "v1",
                "updated_at": "2030-05-01T10:00:00Z",
                "ota_name": "airbnb"
            }
        });

        let extracted = BookingPayload::extract(&payload);
        assert_eq!(extracted.property_id.as_deref(), Some("P1"));
        assert_eq!(extracted.reservation_id.as_deref(), Some("R1"));
        assert_eq!(extracted.room_type_id.as_deref(), Some("RT1"));
        assert_eq!(extracted.guest_name, "Sara");
        assert_eq!(extracted.check_in, Some(date(2030, 5, 10)));
        assert_eq!(extracted.check_out, Some(date(2030, 5, 12)));
        assert_eq!(extracted.revision_id.as_deref(), Some("v1"));
        assert!(extracted.revision_timestamp.is_some());
        assert_eq!(extracted.currency, "SAR");
    }

    #[test]
    fn test_extract_guest_name_fallbacks() {
        let split = json!({"data": {"guest": {"first_name": "Sara", "last_name": "Omari"}}});
        assert_eq!(BookingPayload::extract(&split).guest_name, "Sara Omari");

        let missing = json!({"data": {}});
        assert_eq!(BookingPayload::extract(&missing).guest_name, "OTA Guest");
    }
}
