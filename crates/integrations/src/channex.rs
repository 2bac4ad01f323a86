//! Channel manager API client.
//!
//! Authenticates with the `user-api-key` header (not a bearer token), runs
//! every call through the per-property token buckets, retries transient
//! failures with exponential backoff, pauses the property on 429, and writes
//! a sanitized integration log row per attempt.

use chrono::{DateTime, Utc};
use db::models::channel::{AuditDirection, NewIntegrationLog};
use db::models::rate_state::RateBucket;
use db::repositories::{IntegrationLogRepository, RateStateRepository};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Keys whose values are redacted from logged payloads.
const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "password",
    "secret",
    "token",
    "authorization",
    "user-api-key",
];

/// Errors from channel API operations, mapped to the stable taxonomy.
#[derive(Debug, Error)]
pub enum ChannexError {
    /// The property is paused after a 429; retry once the pause elapses.
    #[error("Property rate-limited, retry in {remaining_secs}s")]
    PropertyPaused { remaining_secs: i64 },

    /// Local token bucket exhausted or 429 retries exhausted.
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ChannexError {
    /// Stable error code for logs and the API.
    pub fn code(&self) -> &'static str {
        match self {
            ChannexError::PropertyPaused { .. } => "rate_limited",
            ChannexError::RateLimited => "rate_limited",
            ChannexError::Unauthorized(_) => "unauthorized",
            ChannexError::Forbidden(_) => "forbidden",
            ChannexError::NotFound(_) => "not_found",
            ChannexError::Validation(_) => "validation_error",
            ChannexError::Server { status, .. } => match status {
                502 => "bad_gateway",
                503 => "service_unavailable",
                _ => "server_error",
            },
            ChannexError::Timeout => "timeout",
            ChannexError::Network(_) => "network_error",
            ChannexError::Serialization(_) => "validation_error",
            ChannexError::Database(_) => "server_error",
        }
    }

    /// Whether the outbox worker should reschedule the event.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ChannexError::PropertyPaused { .. }
                | ChannexError::RateLimited
                | ChannexError::Server { .. }
                | ChannexError::Timeout
                | ChannexError::Network(_)
                | ChannexError::Database(_)
        )
    }

    /// Authorization failures flip the connection into the error state.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ChannexError::Unauthorized(_) | ChannexError::Forbidden(_))
    }
}

/// Client configuration for one connection.
#[derive(Debug, Clone)]
pub struct ChannexClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub external_property_id: String,
    pub connection_id: Option<Uuid>,
    /// Correlation id, echoed in the X-Request-ID header and in logs.
    pub request_id: String,
    pub timeout: Duration,
}

/// Channel manager API client.
pub struct ChannexClient {
    client: reqwest::Client,
    config: ChannexClientConfig,
    /// Rate gate; absent only in unit tests without a database.
    rate_states: Option<RateStateRepository>,
    logs: Option<IntegrationLogRepository>,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ChannexClient {
    pub fn new(
        config: ChannexClientConfig,
        rate_states: Option<RateStateRepository>,
        logs: Option<IntegrationLogRepository>,
    ) -> Result<Self, ChannexError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannexError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            rate_states,
            logs,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.config.request_id
    }

    // ==================== Request Pipeline ====================

    /// Run one API call through the rate gate, with retries.
    async fn request(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        payload: Option<&Value>,
        params: &[(&str, String)],
        bucket: RateBucket,
    ) -> Result<Value, ChannexError> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let started = Instant::now();

        self.acquire_token(bucket).await?;

        let mut last_error: Option<ChannexError> = None;

        for attempt in 0..self.max_retries {
            let mut builder = self
                .client
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .header("user-api-key", &self.config.api_key)
                .header("User-Agent", "MNAM-Backend/3.0")
                .header("X-Request-ID", &self.config.request_id);

            if !params.is_empty() {
                builder = builder.query(params);
            }
            if let Some(body) = payload {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    let err = if e.is_timeout() {
                        ChannexError::Timeout
                    } else {
                        ChannexError::Network(e.to_string())
                    };
                    self.log_attempt(&method, &url, payload, None, false, Some(&err), started)
                        .await;
                    tracing::warn!(
                        request_id = %self.config.request_id,
                        attempt,
                        "channel request failed: {}",
                        err
                    );
                    last_error = Some(err);
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    continue;
                }
            };

            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            let data: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);

            if status.is_success() {
                if let Some(rate_states) = &self.rate_states {
                    rate_states
                        .clear_pause(&self.config.external_property_id)
                        .await
                        .map_err(|e| ChannexError::Database(e.to_string()))?;
                }
                self.log_attempt(&method, &url, payload, Some(status.as_u16()), true, None, started)
                    .await;
                return Ok(data);
            }

            if status.as_u16() == 429 {
                if let Some(rate_states) = &self.rate_states {
                    rate_states
                        .pause_on_429(&self.config.external_property_id)
                        .await
                        .map_err(|e| ChannexError::Database(e.to_string()))?;
                }
                let err = ChannexError::RateLimited;
                self.log_attempt(&method, &url, payload, Some(429), false, Some(&err), started)
                    .await;
                last_error = Some(err);
                tokio::time::sleep(self.backoff_delay(attempt)).await;
                continue;
            }

            if status.is_server_error() {
                let err = ChannexError::Server {
                    status: status.as_u16(),
                    message: extract_error_message(&data)
                        .unwrap_or_else(|| format!("HTTP {}", status)),
                };
                self.log_attempt(&method, &url, payload, Some(status.as_u16()), false, Some(&err), started)
                    .await;
                last_error = Some(err);
                tokio::time::sleep(self.backoff_delay(attempt)).await;
                continue;
            }

            // Remaining 4xx: non-retryable, mapped and returned immediately
            let err = map_client_error(status.as_u16(), &data);
            self.log_attempt(&method, &url, payload, Some(status.as_u16()), false, Some(&err), started)
                .await;
            return Err(err);
        }

        Err(last_error.unwrap_or(ChannexError::RateLimited))
    }

    /// Consume a token, waiting once for a refill when the bucket is empty.
    async fn acquire_token(&self, bucket: RateBucket) -> Result<(), ChannexError> {
        let Some(rate_states) = &self.rate_states else {
            return Ok(());
        };
        let property_id = &self.config.external_property_id;

        if let Some(remaining_secs) = rate_states
            .pause_remaining_secs(property_id)
            .await
            .map_err(|e| ChannexError::Database(e.to_string()))?
        {
            return Err(ChannexError::PropertyPaused { remaining_secs });
        }

        if rate_states
            .try_consume(property_id, bucket)
            .await
            .map_err(|e| ChannexError::Database(e.to_string()))?
        {
            return Ok(());
        }

        let wait = rate_states
            .wait_time_for_token(property_id, bucket)
            .await
            .map_err(|e| ChannexError::Database(e.to_string()))?;
        let wait = wait.min(60.0);
        tracing::info!(
            request_id = %self.config.request_id,
            %property_id,
            bucket = %bucket,
            "bucket empty, waiting {:.2}s for a token",
            wait
        );
        tokio::time::sleep(Duration::from_secs_f64(wait.max(0.0))).await;

        if rate_states
            .try_consume(property_id, bucket)
            .await
            .map_err(|e| ChannexError::Database(e.to_string()))?
        {
            Ok(())
        } else {
            Err(ChannexError::RateLimited)
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }

    async fn log_attempt(
        &self,
        method: &reqwest::Method,
        url: &str,
        payload: Option<&Value>,
        response_status: Option<u16>,
        success: bool,
        error: Option<&ChannexError>,
        started: Instant,
    ) {
        let Some(logs) = &self.logs else {
            return;
        };

        let log = NewIntegrationLog {
            connection_id: self.config.connection_id,
            outbox_id: None,
            log_type: "api_call".to_string(),
            direction: AuditDirection::Outbound,
            event_type: None,
            request_method: Some(method.to_string()),
            request_url: Some(url.to_string()),
            request_payload: payload.map(sanitize_payload),
            response_status: response_status.map(i32::from),
            response_body: None,
            success,
            error_message: error.map(|e| e.to_string()),
            duration_ms: Some(started.elapsed().as_millis() as i32),
            request_id: Some(self.config.request_id.clone()),
        };

        if let Err(e) = logs.record(log).await {
            tracing::warn!(
                request_id = %self.config.request_id,
                "failed to write integration log: {}",
                e
            );
        }
    }

    // ==================== Property Operations ====================

    /// All properties accessible with this API key.
    pub async fn get_properties(&self) -> Result<Value, ChannexError> {
        self.request(reqwest::Method::GET, "/properties", None, &[], RateBucket::Price)
            .await
    }

    /// Property details; defaults to the connection's property.
    pub async fn get_property(&self, property_id: Option<&str>) -> Result<Value, ChannexError> {
        let pid = property_id.unwrap_or(&self.config.external_property_id);
        self.request(
            reqwest::Method::GET,
            &format!("/properties/{}", pid),
            None,
            &[],
            RateBucket::Price,
        )
        .await
    }

    pub async fn get_room_types(&self, property_id: Option<&str>) -> Result<Value, ChannexError> {
        let pid = property_id.unwrap_or(&self.config.external_property_id);
        self.request(
            reqwest::Method::GET,
            "/room_types",
            None,
            &[("filter[property_id]", pid.to_string())],
            RateBucket::Price,
        )
        .await
    }

    pub async fn get_rate_plans(&self, property_id: Option<&str>) -> Result<Value, ChannexError> {
        let pid = property_id.unwrap_or(&self.config.external_property_id);
        self.request(
            reqwest::Method::GET,
            "/rate_plans",
            None,
            &[("filter[property_id]", pid.to_string())],
            RateBucket::Price,
        )
        .await
    }

    // ==================== ARI Operations ====================

    /// Push rate/restriction values. Rates must already be serialized as
    /// strings with two decimals. Consumes from the `price` bucket.
    pub async fn post_restrictions(&self, values: Vec<Value>) -> Result<Value, ChannexError> {
        let payload = json!({ "values": values });
        self.request(
            reqwest::Method::POST,
            "/restrictions",
            Some(&payload),
            &[],
            RateBucket::Price,
        )
        .await
    }

    /// Push availability values (integer 0 or 1 per date). Consumes from the
    /// `avail` bucket.
    pub async fn post_availability(&self, values: Vec<Value>) -> Result<Value, ChannexError> {
        let payload = json!({ "values": values });
        self.request(
            reqwest::Method::POST,
            "/availability",
            Some(&payload),
            &[],
            RateBucket::Avail,
        )
        .await
    }

    // ==================== Booking Operations ====================

    pub async fn get_bookings(
        &self,
        since: Option<DateTime<Utc>>,
        status: Option<&str>,
    ) -> Result<Value, ChannexError> {
        let endpoint = format!("/properties/{}/bookings", self.config.external_property_id);
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(since) = since {
            params.push(("filter[updated_at_gte]", since.to_rfc3339()));
        }
        if let Some(status) = status {
            params.push(("filter[status]", status.to_string()));
        }
        self.request(reqwest::Method::GET, &endpoint, None, &params, RateBucket::Price)
            .await
    }

    pub async fn get_booking(&self, booking_id: &str) -> Result<Value, ChannexError> {
        self.request(
            reqwest::Method::GET,
            &format!("/bookings/{}", booking_id),
            None,
            &[],
            RateBucket::Price,
        )
        .await
    }

    pub async fn confirm_booking(&self, booking_id: &str) -> Result<Value, ChannexError> {
        self.request(
            reqwest::Method::POST,
            &format!("/bookings/{}/confirm", booking_id),
            None,
            &[],
            RateBucket::Price,
        )
        .await
    }

    pub async fn cancel_booking(
        &self,
        booking_id: &str,
        reason: Option<&str>,
    ) -> Result<Value, ChannexError> {
        let payload = reason.map(|r| json!({ "reason": r }));
        self.request(
            reqwest::Method::POST,
            &format!("/bookings/{}/cancel", booking_id),
            payload.as_ref(),
            &[],
            RateBucket::Price,
        )
        .await
    }
}

// ==================== Helpers ====================

/// Serialize a rate for the wire: decimal string with two fractional digits.
pub fn format_rate(rate: Decimal) -> String {
    format!("{:.2}", rate)
}

/// Map a non-429 4xx response to a structured error.
fn map_client_error(status: u16, data: &Value) -> ChannexError {
    let message = extract_error_message(data).unwrap_or_else(|| format!("HTTP {}", status));
    match status {
        401 => ChannexError::Unauthorized(message),
        403 => ChannexError::Forbidden(message),
        404 => ChannexError::NotFound(message),
        422 => ChannexError::Validation(message),
        _ => ChannexError::Validation(message),
    }
}

/// Pull a human-readable message out of a channel error body.
fn extract_error_message(data: &Value) -> Option<String> {
    data.get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| data.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

/// Replace sensitive values with "[REDACTED]", recursively.
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                let lower = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|sk| lower.contains(sk)) {
                    out.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key.clone(), sanitize_payload(value));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_format_rate_two_decimals() {
        assert_eq!(format_rate(dec!(100)), "100.00");
        assert_eq!(format_rate(dec!(99.9)), "99.90");
        assert_eq!(format_rate(dec!(120.505)), "120.51");
        assert_eq!(format_rate(dec!(0)), "0.00");
    }

    #[test]
    fn test_sanitize_payload_redacts_nested_keys() {
        let payload = json!({
            "api_key": "sk-123",
            "values": [{"date": "2030-05-10", "rate": "100.00"}],
            "nested": {"webhook_secret": "shh", "ok": 1},
            "Authorization": "Bearer x"
        });
        let sanitized = sanitize_payload(&payload);
        assert_eq!(sanitized["api_key"], "[REDACTED]");
        assert_eq!(sanitized["nested"]["webhook_secret"], "[REDACTED]");
        assert_eq!(sanitized["Authorization"], "[REDACTED]");
        assert_eq!(sanitized["values"][0]["rate"], "100.00");
        assert_eq!(sanitized["nested"]["ok"], 1);
    }

    #[test]
    fn test_error_codes_match_taxonomy() {
        assert_eq!(ChannexError::Unauthorized("x".into()).code(), "unauthorized");
        assert_eq!(ChannexError::RateLimited.code(), "rate_limited");
        assert_eq!(
            ChannexError::Server { status: 502, message: "x".into() }.code(),
            "bad_gateway"
        );
        assert_eq!(
            ChannexError::Server { status: 503, message: "x".into() }.code(),
            "service_unavailable"
        );
        assert_eq!(
            ChannexError::Server { status: 500, message: "x".into() }.code(),
            "server_error"
        );
        assert_eq!(ChannexError::Timeout.code(), "timeout");
    }

    #[test]
    fn test_retryability() {
        assert!(ChannexError::RateLimited.retryable());
        assert!(ChannexError::Timeout.retryable());
        assert!(ChannexError::Server { status: 500, message: String::new() }.retryable());
        assert!(!ChannexError::Unauthorized(String::new()).retryable());
        assert!(!ChannexError::Validation(String::new()).retryable());
        assert!(ChannexError::Unauthorized(String::new()).is_auth_error());
    }

    #[test]
    fn test_map_client_error() {
        let body = json!({"error": {"message": "bad key"}});
        match map_client_error(401, &body) {
            ChannexError::Unauthorized(msg) => assert_eq!(msg, "bad key"),
            other => panic!("unexpected: {:?}", other),
        }
        match map_client_error(422, &Value::Null) {
            ChannexError::Validation(msg) => assert_eq!(msg, "HTTP 422"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
