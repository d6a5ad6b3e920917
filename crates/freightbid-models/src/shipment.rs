use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a shipment.
///
/// `waiting` shipments collect bids. Acceptance moves them to `active`,
/// impediments toggle `active <-> delayed`, and `delivered` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Waiting,
    Active,
    Delayed,
    Delivered,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Waiting => "waiting",
            ShipmentStatus::Active => "active",
            ShipmentStatus::Delayed => "delayed",
            ShipmentStatus::Delivered => "delivered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered)
    }

    /// The status reached by applying `event`, or `None` when the edge is not
    /// part of the state machine. `waiting` leaves only through bid acceptance.
    pub fn apply(self, event: ShipmentEvent) -> Option<ShipmentStatus> {
        use ShipmentEvent::*;
        use ShipmentStatus::*;

        match (self, event) {
            (Active, Delay) => Some(Delayed),
            (Delayed, Resume) => Some(Active),
            (Active | Delayed, Deliver) => Some(Delivered),
            _ => None,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(ShipmentStatus::Waiting),
            "active" => Ok(ShipmentStatus::Active),
            "delayed" => Ok(ShipmentStatus::Delayed),
            "delivered" => Ok(ShipmentStatus::Delivered),
            other => Err(format!("unknown shipment status: {other}")),
        }
    }
}

/// Events that drive the shipment state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentEvent {
    Delay,
    Resume,
    Deliver,
}

impl fmt::Display for ShipmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShipmentEvent::Delay => "delay",
            ShipmentEvent::Resume => "resume",
            ShipmentEvent::Deliver => "deliver",
        };
        f.write_str(name)
    }
}

impl FromStr for ShipmentEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delay" => Ok(ShipmentEvent::Delay),
            "resume" => Ok(ShipmentEvent::Resume),
            "deliver" => Ok(ShipmentEvent::Deliver),
            other => Err(format!("unknown shipment event: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Air,
    Water,
    Railway,
    Road,
}

/// Origin or destination of a shipment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Place {
    pub postal_code: String,
    #[serde(default)]
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

impl Place {
    pub fn new(postal_code: &str, country: &str) -> Self {
        Self {
            postal_code: postal_code.trim().to_string(),
            city: None,
            country: country.trim().to_uppercase(),
        }
    }

    /// Trimmed, upper-cased copy used for lookups and persistence.
    pub fn normalized(&self) -> Self {
        Self {
            postal_code: self.postal_code.trim().to_string(),
            city: self
                .city
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            country: self.country.trim().to_uppercase(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.postal_code.trim().is_empty() && !self.country.trim().is_empty()
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country, self.postal_code)
    }
}

/// A cargo-movement request tracked from creation through delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shipment {
    pub id: Uuid,
    pub shipper_id: Uuid,
    /// Set only once a bid is accepted.
    pub carrier_id: Option<Uuid>,
    pub status: ShipmentStatus,
    pub modes: Vec<TransportMode>,
    pub pickup_point: Option<String>,
    pub origin: Place,
    pub destination: Place,
    /// Great-circle distance in kilometers.
    pub distance: f64,
    pub cargo_load: f64,
    pub cargo_type: Option<String>,
    /// Agreed price, taken from the accepted bid.
    pub price: Option<Decimal>,
    pub current_location: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    /// Ids of every bid placed on this shipment, oldest first.
    pub bids: Vec<Uuid>,
    pub impediments: Vec<Uuid>,
    pub predicted_route: Option<Uuid>,
    pub route_taken: Option<Uuid>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    /// Only present when `status == delivered`.
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Point in time the delivery clock starts from. Shipments that have not
    /// been dispatched yet fall back to their creation time.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.shipped_at.unwrap_or(self.created_at)
    }
}

/// Fields supplied by a shipper when posting a shipment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShipmentDraft {
    pub origin: Option<Place>,
    pub destination: Option<Place>,
    pub cargo_load: Option<f64>,
    #[serde(default)]
    pub cargo_type: Option<String>,
    #[serde(default)]
    pub modes: Vec<TransportMode>,
    #[serde(default)]
    pub pickup_point: Option<String>,
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_delivery_date: Option<DateTime<Utc>>,
}

/// Partial update of a `waiting` shipment. Unknown fields (status, carrier,
/// price...) are rejected at deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ShipmentPatch {
    #[serde(default)]
    pub origin: Option<Place>,
    #[serde(default)]
    pub destination: Option<Place>,
    #[serde(default)]
    pub cargo_load: Option<f64>,
    #[serde(default)]
    pub cargo_type: Option<String>,
    #[serde(default)]
    pub modes: Option<Vec<TransportMode>>,
    #[serde(default)]
    pub pickup_point: Option<String>,
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_delivery_date: Option<DateTime<Utc>>,
}

impl ShipmentPatch {
    pub fn is_empty(&self) -> bool {
        self == &ShipmentPatch::default()
    }

    pub fn moves_endpoints(&self) -> bool {
        self.origin.is_some() || self.destination.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImpedimentKind {
    Weather,
    Fuel,
    Accident,
    Repair,
    Cargo,
    Other,
}

impl ImpedimentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpedimentKind::Weather => "weather",
            ImpedimentKind::Fuel => "fuel",
            ImpedimentKind::Accident => "accident",
            ImpedimentKind::Repair => "repair",
            ImpedimentKind::Cargo => "cargo",
            ImpedimentKind::Other => "other",
        }
    }
}

impl FromStr for ImpedimentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weather" => Ok(ImpedimentKind::Weather),
            "fuel" => Ok(ImpedimentKind::Fuel),
            "accident" => Ok(ImpedimentKind::Accident),
            "repair" => Ok(ImpedimentKind::Repair),
            "cargo" => Ok(ImpedimentKind::Cargo),
            "other" => Ok(ImpedimentKind::Other),
            other => Err(format!("unknown impediment kind: {other}")),
        }
    }
}

/// A delay-causing event recorded while a shipment is in transit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Impediment {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub kind: ImpedimentKind,
    /// Expected delay in seconds.
    pub delay_seconds: u64,
    pub additional_info: Option<String>,
    pub resolved: bool,
    pub occurred_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpedimentReport {
    pub kind: ImpedimentKind,
    #[serde(default)]
    pub delay_seconds: u64,
    #[serde(default)]
    pub additional_info: Option<String>,
}

/// Result of recording or resolving an impediment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpedimentUpdate {
    pub shipment: Shipment,
    pub impediment: Impediment,
}
