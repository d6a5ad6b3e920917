use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::party::Carrier;
use crate::shipment::Shipment;

/// Accepted layout for `proposed_delivery_date` when no offset is given.
pub const DELIVERY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A carrier's competing offer to fulfill a shipment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bid {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub carrier_id: Uuid,
    pub proposed_price: Decimal,
    pub proposed_vehicle: Uuid,
    pub proposed_delivery_date: DateTime<Utc>,
    pub additional_notes: String,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Bid fields as submitted by a carrier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidDraft {
    pub proposed_price: Decimal,
    pub proposed_vehicle: Uuid,
    /// `YYYY-MM-DDTHH:MM:SS` (UTC) or RFC 3339.
    pub proposed_delivery_date: String,
    #[serde(default)]
    pub additional_notes: Option<String>,
}

/// Parse a proposed delivery date. Naive timestamps are read as UTC.
pub fn parse_delivery_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, DELIVERY_DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The three records touched when a bid is placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidPlacement {
    pub shipment: Shipment,
    pub bid: Bid,
    pub carrier: Carrier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidAcceptance {
    pub shipment: Shipment,
    pub bid: Bid,
    pub carrier: Carrier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidRemoval {
    pub shipment: Shipment,
    pub carrier: Carrier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_naive_delivery_date_as_utc() {
        let parsed = parse_delivery_date("2024-06-03T10:30:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 3, 10, 30, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_delivery_date() {
        let parsed = parse_delivery_date("2024-06-03T12:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 3, 10, 30, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_delivery_date() {
        assert!(parse_delivery_date("next tuesday").is_none());
        assert!(parse_delivery_date("2024-13-01T00:00:00").is_none());
        assert!(parse_delivery_date("").is_none());
    }

    #[test]
    fn draft_accepts_numeric_and_string_prices() {
        let vehicle = Uuid::new_v4();
        let numeric: BidDraft = serde_json::from_value(serde_json::json!({
            "proposed_price": 1200,
            "proposed_vehicle": vehicle,
            "proposed_delivery_date": "2024-06-03T10:30:00",
        }))
        .unwrap();
        assert_eq!(numeric.proposed_price, dec!(1200));
        assert_eq!(numeric.additional_notes, None);

        let text: BidDraft = serde_json::from_value(serde_json::json!({
            "proposed_price": "1250.50",
            "proposed_vehicle": vehicle,
            "proposed_delivery_date": "2024-06-03T10:30:00",
            "additional_notes": "refrigerated",
        }))
        .unwrap();
        assert_eq!(text.proposed_price, dec!(1250.50));
    }
}
