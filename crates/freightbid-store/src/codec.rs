//! Column encoding shared by every table.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that lexical order in SQLite matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreError;

pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(encode_ts)
}

pub(crate) fn encode_opt_uuid(id: &Option<Uuid>) -> Option<String> {
    id.map(|id| id.to_string())
}

pub(crate) fn decode_uuid(table: &'static str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::corrupt(table, format!("bad id '{raw}': {e}")))
}

pub(crate) fn decode_opt_uuid(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<Uuid>, StoreError> {
    raw.map(|r| decode_uuid(table, &r)).transpose()
}

pub(crate) fn decode_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn decode_opt_ts(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|r| decode_ts(table, &r)).transpose()
}

pub(crate) fn decode_decimal(table: &'static str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw)
        .map_err(|e| StoreError::corrupt(table, format!("bad decimal '{raw}': {e}")))
}

pub(crate) fn decode_opt_decimal(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<Decimal>, StoreError> {
    raw.map(|r| decode_decimal(table, &r)).transpose()
}

pub(crate) fn decode_enum<T: FromStr<Err = String>>(
    table: &'static str,
    raw: &str,
) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(|e| StoreError::corrupt(table, e))
}

/// Truncate to the precision the store keeps, so freshly built records
/// compare equal to what is read back.
pub fn truncate_to_storage(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&encode_ts(&ts))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn timestamps_sort_lexically() {
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let whole = encode_ts(&base);
        let fractional = encode_ts(&(base + Duration::microseconds(1500)));
        let later = encode_ts(&(base + Duration::seconds(1)));
        assert_eq!(whole.len(), fractional.len());
        assert!(whole < fractional);
        assert!(fractional < later);
    }

    #[test]
    fn timestamp_roundtrip_truncates_to_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::nanoseconds(1_234_567);
        let decoded = decode_ts("shipments", &encode_ts(&ts)).unwrap();
        assert_eq!(decoded, truncate_to_storage(ts));
        assert_eq!(decoded.timestamp_subsec_micros(), 1_234);
    }

    #[test]
    fn corrupt_values_are_reported() {
        let err = decode_uuid("bids", "not-a-uuid").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "bids", .. }));
        assert!(decode_decimal("bids", "12,5").is_err());
        assert!(decode_ts("bids", "yesterday").is_err());
    }
}
