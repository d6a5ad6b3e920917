//! Builders and seeders shared by unit and integration tests.

use chrono::{Duration, Utc};
use freightbid_models::bid::Bid;
use freightbid_models::party::{Carrier, Shipper, Vehicle};
use freightbid_models::shipment::{Place, Shipment, ShipmentStatus, TransportMode};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::Store;

pub fn make_shipment(shipper_id: Uuid) -> Shipment {
    let now = Utc::now();
    Shipment {
        id: Uuid::new_v4(),
        shipper_id,
        carrier_id: None,
        status: ShipmentStatus::Waiting,
        modes: vec![TransportMode::Road],
        pickup_point: None,
        origin: Place::new("560001", "IN"),
        destination: Place::new("400001", "IN"),
        distance: 845.2,
        cargo_load: 12.0,
        cargo_type: Some("textiles".to_string()),
        price: None,
        current_location: None,
        vehicle_id: None,
        bids: vec![],
        impediments: vec![],
        predicted_route: None,
        route_taken: None,
        shipped_at: None,
        estimated_delivery_date: None,
        delivered_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn make_bid(shipment_id: Uuid, carrier_id: Uuid, vehicle_id: Uuid, price: Decimal) -> Bid {
    let now = Utc::now();
    Bid {
        id: Uuid::new_v4(),
        shipment_id,
        carrier_id,
        proposed_price: price,
        proposed_vehicle: vehicle_id,
        proposed_delivery_date: now + Duration::days(3),
        additional_notes: String::new(),
        accepted: false,
        created_at: now,
        accepted_at: None,
    }
}

pub fn seed_shipper(store: &Store) -> Result<Shipper, StoreError> {
    store.insert_shipper(&Shipper::new(Uuid::new_v4()))
}

/// A carrier owning one vehicle.
pub fn seed_carrier(store: &Store) -> Result<(Carrier, Vehicle), StoreError> {
    let carrier = store.insert_carrier(&Carrier::new(Uuid::new_v4()))?;
    let vehicle = store.insert_vehicle(&Vehicle::new(carrier.id, "KA-05-MN-4411"))?;
    Ok((carrier, vehicle))
}

pub fn seed_shipment(store: &Store) -> Result<Shipment, StoreError> {
    let shipper = seed_shipper(store)?;
    store.insert_shipment(&make_shipment(shipper.id))
}
