//! Batch builder for channel ARI pushes.
//!
//! Compresses consecutive dates carrying the same value into `{date_from,
//! date_to, value}` ranges, builds wire payload values, and splits them so
//! every serialized request stays under the payload cap. Output is
//! deterministic for a given input.

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

/// A compressed run of consecutive dates with one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange<V> {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub value: V,
}

/// Compress sorted-or-not per-day values into maximal consecutive runs.
/// A gap of one day or a value change breaks the run.
pub fn compress_ranges<V: PartialEq + Clone>(points: &[(NaiveDate, V)]) -> Vec<DateRange<V>> {
    let mut sorted: Vec<&(NaiveDate, V)> = points.iter().collect();
    sorted.sort_by_key(|(date, _)| *date);

    let mut ranges: Vec<DateRange<V>> = Vec::new();
    for (date, value) in sorted {
        match ranges.last_mut() {
            Some(range)
                if range.value == *value && *date - range.date_to == Duration::days(1) =>
            {
                range.date_to = *date;
            }
            Some(range) if range.date_to == *date && range.value == *value => {
                // Duplicate day with the same value; already covered
            }
            _ => ranges.push(DateRange {
                date_from: *date,
                date_to: *date,
                value: value.clone(),
            }),
        }
    }
    ranges
}

/// Expand ranges back to per-day values, sorted by date.
pub fn expand_ranges<V: Clone>(ranges: &[DateRange<V>]) -> Vec<(NaiveDate, V)> {
    let mut points = Vec::new();
    for range in ranges {
        let mut date = range.date_from;
        while date <= range.date_to {
            points.push((date, range.value.clone()));
            date += Duration::days(1);
        }
    }
    points.sort_by_key(|(date, _)| *date);
    points
}

/// Wire values for a rate push: rates serialized as 2-decimal strings,
/// compressed into date ranges.
pub fn build_rate_values(
    property_id: &str,
    rate_plan_id: &str,
    rates: &[(NaiveDate, String)],
) -> Vec<Value> {
    compress_ranges(rates)
        .into_iter()
        .map(|range| {
            json!({
                "property_id": property_id,
                "rate_plan_id": rate_plan_id,
                "date_from": range.date_from.to_string(),
                "date_to": range.date_to.to_string(),
                "rate": range.value,
            })
        })
        .collect()
}

/// Wire values for an availability push: integer 0/1 per date range.
pub fn build_availability_values(
    property_id: &str,
    room_type_id: &str,
    days: &[(NaiveDate, i32)],
) -> Vec<Value> {
    compress_ranges(days)
        .into_iter()
        .map(|range| {
            json!({
                "property_id": property_id,
                "room_type_id": room_type_id,
                "date_from": range.date_from.to_string(),
                "date_to": range.date_to.to_string(),
                "availability": range.value,
            })
        })
        .collect()
}

/// Split values into chunks whose serialized `{"values": [...]}` payload
/// stays under `max_bytes`. Sizes are measured on the actual JSON, not
/// estimated. A single oversized value still ships alone.
pub fn split_values(values: Vec<Value>, max_bytes: usize) -> Vec<Vec<Value>> {
    // {"values":[]}
    const WRAPPER_OVERHEAD: usize = 13;

    let mut chunks: Vec<Vec<Value>> = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    let mut current_size = WRAPPER_OVERHEAD;

    for value in values {
        let item_len = serde_json::to_string(&value).map(|s| s.len()).unwrap_or(0);
        let separator = usize::from(!current.is_empty());

        if !current.is_empty() && current_size + separator + item_len > max_bytes {
            chunks.push(std::mem::take(&mut current));
            current_size = WRAPPER_OVERHEAD;
        }
        current_size += usize::from(!current.is_empty()) + item_len;
        current.push(value);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Serialized size of one `{"values": [...]}` payload.
pub fn payload_size(values: &[Value]) -> usize {
    serde_json::to_string(&json!({ "values": values }))
        .map(|s| s.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 5, d).unwrap()
    }

    #[test]
    fn test_compress_merges_consecutive_equal_values() {
        let points = vec![
            (date(1), "100.00".to_string()),
            (date(2), "100.00".to_string()),
            (date(3), "100.00".to_string()),
            (date(4), "120.00".to_string()),
        ];
        let ranges = compress_ranges(&points);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].date_from, date(1));
        assert_eq!(ranges[0].date_to, date(3));
        assert_eq!(ranges[0].value, "100.00");
        assert_eq!(ranges[1].date_from, date(4));
        assert_eq!(ranges[1].date_to, date(4));
    }

    #[test]
    fn test_compress_breaks_on_gap() {
        let points = vec![
            (date(1), 1),
            (date(2), 1),
            // gap: no day 3
            (date(4), 1),
        ];
        let ranges = compress_ranges(&points);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].date_to, date(2));
        assert_eq!(ranges[1].date_from, date(4));
    }

    #[test]
    fn test_compress_is_order_insensitive() {
        let shuffled = vec![(date(3), 1), (date(1), 1), (date(2), 1)];
        let sorted = vec![(date(1), 1), (date(2), 1), (date(3), 1)];
        assert_eq!(compress_ranges(&shuffled), compress_ranges(&sorted));
    }

    #[test]
    fn test_expand_compress_round_trip() {
        let points = vec![
            (date(1), 0),
            (date(2), 0),
            (date(3), 1),
            (date(5), 1),
            (date(6), 0),
        ];
        let round_tripped = expand_ranges(&compress_ranges(&points));
        let mut expected = points.clone();
        expected.sort_by_key(|(d, _)| *d);
        assert_eq!(round_tripped, expected);
    }

    #[test]
    fn test_rate_values_wire_shape() {
        let values = build_rate_values(
            "P1",
            "RP1",
            &[
                (date(1), "100.00".to_string()),
                (date(2), "100.00".to_string()),
            ],
        );
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["property_id"], "P1");
        assert_eq!(values[0]["rate_plan_id"], "RP1");
        assert_eq!(values[0]["date_from"], "2030-05-01");
        assert_eq!(values[0]["date_to"], "2030-05-02");
        assert_eq!(values[0]["rate"], "100.00");
    }

    #[test]
    fn test_availability_values_wire_shape() {
        let values = build_availability_values("P1", "RT1", &[(date(1), 0), (date(2), 1)]);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["availability"], 0);
        assert_eq!(values[1]["availability"], 1);
        assert_eq!(values[0]["room_type_id"], "RT1");
    }

    #[test]
    fn test_split_respects_payload_cap() {
        let values: Vec<Value> = (1..=28)
            .map(|d| json!({"date": date(d).to_string(), "availability": 1}))
            .collect();

        let single = split_values(values.clone(), 10_000_000);
        assert_eq!(single.len(), 1);

        let cap = 500;
        let chunks = split_values(values.clone(), cap);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(payload_size(chunk) <= cap, "chunk size {}", payload_size(chunk));
        }
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, values.len());
    }

    #[test]
    fn test_split_keeps_oversized_value_alone() {
        let big = json!({"blob": "x".repeat(1000)});
        let chunks = split_values(vec![big.clone(), json!({"a": 1})], 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0][0], big);
    }
}
