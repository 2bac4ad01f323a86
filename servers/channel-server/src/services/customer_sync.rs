//! Customer sync: phone normalization, name sanitization, and the
//! create-or-update path used when OTA bookings arrive.

use db::models::customer::{Customer, Gender};
use db::repositories::CustomerRepository;
use rust_decimal::Decimal;
use sqlx::{Error as SqlxError, PgConnection};
use std::str::FromStr;

/// Normalize a phone number to the canonical Saudi form `0XXXXXXXXX`.
///
/// Handles `+966…`, `966…`, `00966…`, bare `5XXXXXXXX`, and embedded
/// separators. Numbers that do not fit the Saudi mobile shape are returned
/// digits-only.
pub fn normalize_phone(phone: &str) -> String {
    let mut digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return digits;
    }

    if digits.starts_with("966") && digits.len() >= 12 {
        digits = digits[3..].to_string();
    } else if digits.starts_with("00966") && digits.len() >= 14 {
        digits = digits[5..].to_string();
    }

    if digits.starts_with('5') && digits.len() == 9 {
        digits.insert(0, '0');
    }

    digits
}

/// Sanitize a guest name: keep Latin/Arabic letters, digits and whitespace,
/// collapse runs of whitespace, trim.
pub fn sanitize_name(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || c.is_whitespace() || ('\u{0600}'..='\u{06FF}').contains(c)
        })
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Basic customer info validation for the manual-booking path.
pub fn validate_customer_info(name: &str, phone: &str) -> Result<(), String> {
    if sanitize_name(name).chars().count() < 2 {
        return Err("customer name required (at least 2 characters)".to_string());
    }
    let normalized = normalize_phone(phone);
    if normalized.len() < 9 {
        return Err("valid phone number required".to_string());
    }
    Ok(())
}

/// Outcome of a customer upsert.
#[derive(Debug)]
pub struct CustomerUpsert {
    pub customer: Customer,
    pub created: bool,
}

/// Customer create-or-update from booking payloads.
#[derive(Clone)]
pub struct CustomerSync {
    customers: CustomerRepository,
}

impl CustomerSync {
    pub fn new(customers: CustomerRepository) -> Self {
        Self { customers }
    }

    /// Create or update a customer from booking data, inside the caller's
    /// transaction.
    ///
    /// Existing customers are updated non-destructively: the name is only
    /// replaced by a longer one, the gender only set when missing, and the
    /// booking counters are bumped atomically. Returns `None` when no usable
    /// phone number is present.
    pub async fn upsert_from_booking(
        &self,
        conn: &mut PgConnection,
        name: &str,
        phone: Option<&str>,
        email: Option<&str>,
        gender: Option<&str>,
        booking_amount: Decimal,
    ) -> Result<Option<CustomerUpsert>, SqlxError> {
        let clean_name = sanitize_name(name);
        let normalized_phone = phone.map(normalize_phone).unwrap_or_default();
        if normalized_phone.is_empty() {
            return Ok(None);
        }

        let gender = gender
            .and_then(|g| Gender::from_str(g).ok())
            .map(|g| g.to_string());

        if let Some(existing) = self
            .customers
            .find_by_phone_for_update(conn, &normalized_phone)
            .await?
        {
            let better_name = if clean_name.chars().count() > existing.name.chars().count() {
                Some(clean_name.as_str())
            } else {
                None
            };
            let final_name = better_name.unwrap_or(existing.name.as_str());
            let complete = Customer::profile_complete(final_name, &existing.phone);

            let updated = self
                .customers
                .update_profile(conn, existing.id, better_name, gender.as_deref(), complete)
                .await?;
            self.customers
                .apply_booking_counters(conn, existing.id, 1, booking_amount)
                .await?;

            if updated.is_banned {
                tracing::warn!(
                    customer_id = %updated.id,
                    "booking recorded for banned customer, flagged for review"
                );
            }

            return Ok(Some(CustomerUpsert {
                customer: updated,
                created: false,
            }));
        }

        let complete = Customer::profile_complete(&clean_name, &normalized_phone);
        let customer = self
            .customers
            .insert(
                conn,
                &clean_name,
                &normalized_phone,
                email,
                gender.as_deref(),
                1,
                booking_amount,
                complete,
                Some("Created from OTA booking"),
            )
            .await?;

        Ok(Some(CustomerUpsert {
            customer,
            created: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_saudi_forms() {
        assert_eq!(normalize_phone("+966501234567"), "0501234567");
        assert_eq!(normalize_phone("966501234567"), "0501234567");
        assert_eq!(normalize_phone("00966501234567"), "0501234567");
        assert_eq!(normalize_phone("0501234567"), "0501234567");
        assert_eq!(normalize_phone("501234567"), "0501234567");
        assert_eq!(normalize_phone("05 01 23 45 67"), "0501234567");
    }

    #[test]
    fn test_normalize_phone_non_saudi_kept_digits_only() {
        assert_eq!(normalize_phone("+44 20 7946 0958"), "442079460958");
        assert_eq!(normalize_phone("12345"), "12345");
        assert_eq!(normalize_phone(""), "");
        assert_eq!(normalize_phone("no digits"), "");
    }

    #[test]
    fn test_normalize_phone_is_idempotent() {
        for raw in ["+966501234567", "501234567", "0501234567", "12345"] {
            let once = normalize_phone(raw);
            assert_eq!(normalize_phone(&once), once);
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Sara   AlOmari  "), "Sara AlOmari");
        assert_eq!(sanitize_name("محمد  العتيبي"), "محمد العتيبي");
        assert_eq!(sanitize_name("J@ne <Doe>"), "Jne Doe");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn test_sanitize_name_is_idempotent() {
        for raw in ["  Sara   Al-Omari  ", "محمد", "J@ne Doe"] {
            let once = sanitize_name(raw);
            assert_eq!(sanitize_name(&once), once);
        }
    }

    #[test]
    fn test_validate_customer_info() {
        assert!(validate_customer_info("Sara", "0501234567").is_ok());
        assert!(validate_customer_info("S", "0501234567").is_err());
        assert!(validate_customer_info("Sara", "123").is_err());
    }
}
