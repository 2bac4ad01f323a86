//! Webhook signature verification and payload hashing.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook signature.
///
/// The channel signs the raw request body with HMAC-SHA256 keyed by the
/// connection's webhook secret and sends the hex digest in a header.
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(body);

    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_compare(signature, &expected)
}

/// SHA-256 of the canonical JSON form of a payload.
///
/// `serde_json` objects iterate in key order, so re-serializing yields a
/// stable sorted-keys representation regardless of wire ordering.
pub fn canonical_payload_hash(payload: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"event":"booking.new"}"#;
        let secret = "test-secret";

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(body, &signature, secret));
        assert!(!verify_webhook_signature(body, &signature, "other-secret"));
        assert!(!verify_webhook_signature(b"tampered", &signature, secret));
    }

    #[test]
    fn test_signature_rejects_empty_inputs() {
        assert!(!verify_webhook_signature(b"body", "", "secret"));
        assert!(!verify_webhook_signature(b"body", "sig", ""));
    }

    #[test]
    fn test_canonical_hash_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canonical_payload_hash(&a), canonical_payload_hash(&b));

        let c = json!({"b": 1, "a": {"y": 2, "x": 4}});
        assert_ne!(canonical_payload_hash(&a), canonical_payload_hash(&c));
    }
}
