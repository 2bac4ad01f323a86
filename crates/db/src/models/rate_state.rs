//! Per-property rate limiting state.
//!
//! Token bucket per channel property, two buckets: `price` (rates and
//! restrictions) and `avail` (availability). 10 tokens capacity, refilled
//! at 10 per minute. On a 429 the property is paused with exponential
//! backoff: 60s doubling up to 600s.
//!
//! The state is persisted so restarts do not reset rate credits. All time
//! arithmetic takes an explicit `now` so it stays testable; the repository
//! supplies the wall clock under a row lock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Which bucket an outbound call consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RateBucket {
    /// Rates + restrictions requests.
    Price,
    /// Availability requests.
    Avail,
}

impl fmt::Display for RateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateBucket::Price => write!(f, "price"),
            RateBucket::Avail => write!(f, "avail"),
        }
    }
}

/// Rate limiting state for one external property.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PropertyRateState {
    pub id: Uuid,
    /// The channel's property id, not the internal project id.
    pub external_property_id: String,
    pub price_tokens: f64,
    pub price_last_refill_at: DateTime<Utc>,
    pub avail_tokens: f64,
    pub avail_last_refill_at: DateTime<Utc>,
    /// Paused while `now < paused_until`.
    pub paused_until: Option<DateTime<Utc>>,
    /// Consecutive pauses; drives the exponential backoff.
    pub pause_count: i32,
    pub last_429_at: Option<DateTime<Utc>>,
    pub total_requests: i64,
    pub total_429s: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PropertyRateState {
    pub const MAX_TOKENS: f64 = 10.0;
    /// 10 tokens per minute.
    pub const REFILL_RATE_PER_SEC: f64 = 10.0 / 60.0;
    pub const BASE_PAUSE_SECONDS: i64 = 60;
    pub const MAX_PAUSE_SECONDS: i64 = 600;

    /// Fresh state with full buckets.
    pub fn new(external_property_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_property_id,
            price_tokens: Self::MAX_TOKENS,
            price_last_refill_at: now,
            avail_tokens: Self::MAX_TOKENS,
            avail_last_refill_at: now,
            paused_until: None,
            pause_count: 0,
            last_429_at: None,
            total_requests: 0,
            total_429s: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn bucket_mut(&mut self, bucket: RateBucket) -> (&mut f64, &mut DateTime<Utc>) {
        match bucket {
            RateBucket::Price => (&mut self.price_tokens, &mut self.price_last_refill_at),
            RateBucket::Avail => (&mut self.avail_tokens, &mut self.avail_last_refill_at),
        }
    }

    pub fn tokens(&self, bucket: RateBucket) -> f64 {
        match bucket {
            RateBucket::Price => self.price_tokens,
            RateBucket::Avail => self.avail_tokens,
        }
    }

    /// Refill by elapsed time since the last refill, capped at capacity.
    /// Returns the token count after refill.
    pub fn refill(&mut self, bucket: RateBucket, now: DateTime<Utc>) -> f64 {
        let (tokens, last_refill) = self.bucket_mut(bucket);
        let elapsed = (now - *last_refill).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            *tokens = (*tokens + elapsed * Self::REFILL_RATE_PER_SEC).min(Self::MAX_TOKENS);
            *last_refill = now;
        }
        *tokens
    }

    /// Consume one token if at least one is available.
    pub fn try_consume(&mut self, bucket: RateBucket, now: DateTime<Utc>) -> bool {
        self.refill(bucket, now);
        let (tokens, _) = self.bucket_mut(bucket);
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            self.total_requests += 1;
            true
        } else {
            false
        }
    }

    /// Seconds until one full token is available.
    pub fn wait_time_for_token(&mut self, bucket: RateBucket, now: DateTime<Utc>) -> f64 {
        let tokens = self.refill(bucket, now);
        if tokens >= 1.0 {
            0.0
        } else {
            (1.0 - tokens) / Self::REFILL_RATE_PER_SEC
        }
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        matches!(self.paused_until, Some(until) if now < until)
    }

    /// Remaining pause duration in seconds, zero when not paused.
    pub fn pause_remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        match self.paused_until {
            Some(until) if now < until => (until - now).num_seconds().max(0),
            _ => 0,
        }
    }

    /// Pause after a 429: 60s, 120s, 240s, 480s, capped at 600s.
    pub fn pause_on_429(&mut self, now: DateTime<Utc>) {
        self.pause_count += 1;
        self.total_429s += 1;
        self.last_429_at = Some(now);

        let exp = (self.pause_count - 1).min(30) as u32;
        let pause_seconds =
            (Self::BASE_PAUSE_SECONDS.saturating_mul(1i64 << exp)).min(Self::MAX_PAUSE_SECONDS);
        self.paused_until = Some(now + Duration::seconds(pause_seconds));
    }

    /// Clear an elapsed pause after a successful request. The pause count
    /// decays by one instead of resetting, which dampens thrash when the
    /// channel keeps flapping.
    pub fn clear_pause(&mut self, now: DateTime<Utc>) {
        if let Some(until) = self.paused_until {
            if now >= until {
                self.paused_until = None;
                if self.pause_count > 0 {
                    self.pause_count -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(now: DateTime<Utc>) -> PropertyRateState {
        PropertyRateState::new("prop-1".to_string(), now)
    }

    #[test]
    fn test_consume_and_refill() {
        let t0 = Utc::now();
        let mut s = state(t0);

        for _ in 0..10 {
            assert!(s.try_consume(RateBucket::Price, t0));
        }
        assert!(!s.try_consume(RateBucket::Price, t0));
        assert_eq!(s.total_requests, 10);

        // 30 seconds refills 5 tokens
        let t1 = t0 + Duration::seconds(30);
        let tokens = s.refill(RateBucket::Price, t1);
        assert!((tokens - 5.0).abs() < 0.01, "got {}", tokens);

        // Never exceeds capacity
        let t2 = t1 + Duration::seconds(600);
        assert_eq!(s.refill(RateBucket::Price, t2), PropertyRateState::MAX_TOKENS);
    }

    #[test]
    fn test_buckets_are_independent() {
        let t0 = Utc::now();
        let mut s = state(t0);
        for _ in 0..10 {
            assert!(s.try_consume(RateBucket::Price, t0));
        }
        assert!(!s.try_consume(RateBucket::Price, t0));
        assert!(s.try_consume(RateBucket::Avail, t0));
        assert!((s.avail_tokens - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tokens_stay_in_bounds() {
        let t0 = Utc::now();
        let mut s = state(t0);
        let mut now = t0;
        for i in 0..50 {
            now = now + Duration::seconds(7);
            s.try_consume(RateBucket::Price, now);
            assert!(s.price_tokens >= 0.0, "negative tokens on iteration {}", i);
            assert!(s.price_tokens <= PropertyRateState::MAX_TOKENS);
        }
    }

    #[test]
    fn test_wait_time_for_token() {
        let t0 = Utc::now();
        let mut s = state(t0);
        for _ in 0..10 {
            s.try_consume(RateBucket::Avail, t0);
        }
        let wait = s.wait_time_for_token(RateBucket::Avail, t0);
        assert!((wait - 6.0).abs() < 0.01, "one token takes 6s, got {}", wait);
    }

    #[test]
    fn test_pause_backoff_doubles_and_caps() {
        let t0 = Utc::now();
        let mut s = state(t0);

        s.pause_on_429(t0);
        assert_eq!(s.pause_remaining_secs(t0), 60);

        s.pause_on_429(t0);
        assert_eq!(s.pause_remaining_secs(t0), 120);

        s.pause_on_429(t0);
        assert_eq!(s.pause_remaining_secs(t0), 240);

        s.pause_on_429(t0);
        assert_eq!(s.pause_remaining_secs(t0), 480);

        s.pause_on_429(t0);
        assert_eq!(s.pause_remaining_secs(t0), 600);

        // Stays capped
        s.pause_on_429(t0);
        assert_eq!(s.pause_remaining_secs(t0), 600);
        assert_eq!(s.total_429s, 6);
    }

    #[test]
    fn test_clear_pause_decays_count() {
        let t0 = Utc::now();
        let mut s = state(t0);
        s.pause_on_429(t0);
        s.pause_on_429(t0);
        assert_eq!(s.pause_count, 2);

        // Still paused: clear is a no-op
        s.clear_pause(t0);
        assert!(s.is_paused(t0));
        assert_eq!(s.pause_count, 2);

        // After the pause elapses the count decays by one, not to zero
        let later = t0 + Duration::seconds(601);
        s.clear_pause(later);
        assert!(!s.is_paused(later));
        assert_eq!(s.pause_count, 1);
    }
}
