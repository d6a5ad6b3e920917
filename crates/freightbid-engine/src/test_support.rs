//! Test support: stub scoring models, a small built-in gazetteer and a
//! fixture wiring every component over an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use freightbid_models::bid::{Bid, BidDraft, DELIVERY_DATE_FORMAT};
use freightbid_models::config::PaginationConfig;
use freightbid_models::party::{Carrier, Shipper, Vehicle};
use freightbid_models::shipment::{Place, Shipment, ShipmentDraft, TransportMode};
use freightbid_store::test_support::{make_shipment, seed_carrier, seed_shipper};
use freightbid_store::Store;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::distance::GazetteerEstimator;
use crate::error::ScoringError;
use crate::ledger::BidLedger;
use crate::registry::ShipmentRegistry;
use crate::reputation::ReputationTracker;
use crate::scoring::handle::ModelHandle;
use crate::scoring::{BidScorer, FeatureVector, ScoringModel};

/// GeoNames-format rows for a handful of Indian post offices.
pub const SAMPLE_GAZETTEER: &str = "\
IN\t560001\tBangalore G.P.O.\tKarnataka\t19\tBangalore\t583\t\t\t12.9716\t77.5946\t4
IN\t400001\tMumbai G.P.O.\tMaharashtra\t16\tMumbai\t518\t\t\t18.9388\t72.8354\t4
IN\t110001\tConnaught Place\tDelhi\t07\tNew Delhi\t\t\t\t28.6315\t77.2167\t4
IN\t600001\tChennai G.P.O.\tTamil Nadu\t25\tChennai\t603\t\t\t13.0878\t80.2785\t4
";

pub fn sample_gazetteer() -> GazetteerEstimator {
    GazetteerEstimator::parse(SAMPLE_GAZETTEER)
}

/// A scoring model backed by a closure.
pub struct FnModel<F>(pub F);

impl<F> FnModel<F>
where
    F: Fn(&FeatureVector) -> Result<f64, ScoringError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ScoringModel for FnModel<F>
where
    F: Fn(&FeatureVector) -> Result<f64, ScoringError> + Send + Sync + 'static,
{
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        (self.0)(features)
    }
}

/// Prefers the lowest price per kilometer.
pub fn cheapest_per_km() -> Arc<dyn ScoringModel> {
    Arc::new(FnModel::new(|f: &FeatureVector| Ok(-f[8])))
}

/// An unpersisted shipment with the given distance and load.
pub fn shipment_with(distance: f64, cargo_load: f64) -> Shipment {
    let mut shipment = make_shipment(Uuid::new_v4());
    shipment.distance = distance;
    shipment.cargo_load = cargo_load;
    shipment
}

/// An unpersisted bid on `shipment`.
pub fn bid_with(shipment: &Shipment, price: Decimal, delivery: DateTime<Utc>) -> Bid {
    Bid {
        id: Uuid::new_v4(),
        shipment_id: shipment.id,
        carrier_id: Uuid::new_v4(),
        proposed_price: price,
        proposed_vehicle: Uuid::new_v4(),
        proposed_delivery_date: delivery,
        additional_notes: String::new(),
        accepted: false,
        created_at: Utc::now(),
        accepted_at: None,
    }
}

/// Bangalore to Mumbai, 12 t by road.
pub fn draft() -> ShipmentDraft {
    ShipmentDraft {
        origin: Some(Place::new("560001", "IN")),
        destination: Some(Place::new("400001", "IN")),
        cargo_load: Some(12.0),
        cargo_type: Some("textiles".to_string()),
        modes: vec![TransportMode::Road],
        ..Default::default()
    }
}

/// A bid draft due three days from now.
pub fn bid_draft(vehicle: Uuid, price: Decimal) -> BidDraft {
    BidDraft {
        proposed_price: price,
        proposed_vehicle: vehicle,
        proposed_delivery_date: (Utc::now() + ChronoDuration::days(3))
            .format(DELIVERY_DATE_FORMAT)
            .to_string(),
        additional_notes: None,
    }
}

/// Every component wired over one in-memory store.
pub struct Fixture {
    pub store: Arc<Store>,
    pub models: Arc<ModelHandle>,
    pub registry: ShipmentRegistry,
    pub ledger: BidLedger,
    pub reputation: ReputationTracker,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Fixture scoring with [`cheapest_per_km`].
    pub fn new() -> Self {
        Self::with_models(ModelHandle::preloaded("cheapest-per-km", cheapest_per_km()))
    }

    /// Fixture whose scorer has no model loaded.
    pub fn without_model() -> Self {
        Self::with_models(ModelHandle::new())
    }

    pub fn with_models(models: ModelHandle) -> Self {
        let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
        let models = Arc::new(models);
        let scorer = Arc::new(BidScorer::new(models.clone(), Duration::from_secs(2)));
        Self {
            registry: ShipmentRegistry::new(
                store.clone(),
                Arc::new(sample_gazetteer()),
                Duration::from_secs(2),
                PaginationConfig::default(),
            ),
            ledger: BidLedger::new(store.clone(), scorer),
            reputation: ReputationTracker::new(store.clone()),
            models,
            store,
        }
    }

    pub fn shipper(&self) -> Shipper {
        seed_shipper(&self.store).expect("seed shipper")
    }

    pub fn carrier(&self) -> (Carrier, Vehicle) {
        seed_carrier(&self.store).expect("seed carrier")
    }
}
