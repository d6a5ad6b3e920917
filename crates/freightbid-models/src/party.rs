use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest rating a carrier can receive.
pub const MIN_RATING: f64 = 1.0;
/// Highest rating a carrier can receive.
pub const MAX_RATING: f64 = 5.0;

/// A transport-capacity provider with its reputation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Carrier {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vehicles: Vec<Uuid>,
    pub bids: Vec<Uuid>,
    pub delivered_shipments: Vec<Uuid>,
    /// Running mean in `[1.0, 5.0]`, unset until the first rating.
    pub rating: Option<f64>,
    pub total_ratings: u32,
    pub created_at: DateTime<Utc>,
}

impl Carrier {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            vehicles: Vec::new(),
            bids: Vec::new(),
            delivered_shipments: Vec::new(),
            rating: None,
            total_ratings: 0,
            created_at: Utc::now(),
        }
    }
}

/// The party requesting transport of cargo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shipper {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sent_shipments: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Shipper {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sent_shipments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub id: Uuid,
    pub carrier_id: Uuid,
    pub registration_number: String,
    pub created_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn new(carrier_id: Uuid, registration_number: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            carrier_id,
            registration_number: registration_number.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Who is performing an operation. Authentication happens upstream; the core
/// only compares the acting user against resource ownership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    Shipper(Uuid),
    Carrier(Uuid),
    /// Internal automation (e.g. the automated top-bid acceptance flow).
    System,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_carrier_is_unrated() {
        let carrier = Carrier::new(Uuid::new_v4());
        assert_eq!(carrier.rating, None);
        assert_eq!(carrier.total_ratings, 0);
        assert!(carrier.bids.is_empty());
    }

    #[test]
    fn actor_serialization() {
        let user = Uuid::nil();
        let json = serde_json::to_value(Actor::Shipper(user)).unwrap();
        assert_eq!(json["role"], "shipper");
        assert_eq!(
            serde_json::to_value(Actor::System).unwrap(),
            serde_json::json!({"role": "system"})
        );
    }
}
