//! freightbid - shipment and bid lifecycle core of a freight marketplace.
//!
//! Shippers post shipments, carriers bid on them, and one bid is selected to
//! fulfill each shipment, either by the shipper or by the scoring model.
//! [`Marketplace`] exposes one method per operation; every method checks the
//! acting user's ownership and answers with a transport-neutral [`Reply`].
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use freightbid::models::{Actor, FreightConfig, ShipmentDraft};
//! use freightbid::{build_marketplace, Marketplace};
//! ```

pub use freightbid_engine as engine;
pub use freightbid_models as models;
pub use freightbid_store as store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use freightbid_engine::{
    Access, ArtifactDir, BidLedger, BidScorer, CachedEstimator, DistanceEstimator, EngineError,
    ErrorKind, GazetteerEstimator, ModelHandle, ModelWatcher, ReputationTracker, ScoredBid,
    ShipmentRegistry,
};
use freightbid_models::bid::{Bid, BidAcceptance, BidDraft, BidPlacement, BidRemoval};
use freightbid_models::config::FreightConfig;
use freightbid_models::envelope::{Outcome, Page, Reply};
use freightbid_models::party::{Actor, Carrier, Shipper, Vehicle};
use freightbid_models::shipment::{
    Impediment, ImpedimentReport, ImpedimentUpdate, Shipment, ShipmentDraft, ShipmentEvent,
    ShipmentPatch, ShipmentStatus,
};
use freightbid_store::{Store, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Map an engine failure onto the response outcome.
pub fn outcome_for(kind: ErrorKind) -> Outcome {
    match kind {
        ErrorKind::Validation => Outcome::ValidationError,
        ErrorKind::NotFound => Outcome::NotFound,
        ErrorKind::Conflict => Outcome::Conflict,
        ErrorKind::AuthorizationMismatch => Outcome::AuthorizationMismatch,
        ErrorKind::ServiceUnavailable => Outcome::ServiceUnavailable,
        ErrorKind::InternalInvariantViolation => Outcome::InternalError,
    }
}

fn failure<T>(err: EngineError, message: &str) -> Reply<T> {
    let kind = err.kind();
    match kind {
        ErrorKind::InternalInvariantViolation | ErrorKind::ServiceUnavailable => {
            warn!(error = %err, ?kind, "{message}")
        }
        _ => info!(error = %err, ?kind, "{message}"),
    }
    Reply::failed(outcome_for(kind), message, err.to_string())
}

fn ok<T>(result: Result<T, EngineError>, done: &str, failed: &str) -> Reply<T> {
    match result {
        Ok(data) => Reply::ok(done, data),
        Err(err) => failure(err, failed),
    }
}

fn created<T>(result: Result<T, EngineError>, done: &str, failed: &str) -> Reply<T> {
    match result {
        Ok(data) => Reply::created(done, data),
        Err(err) => failure(err, failed),
    }
}

/// A user holds at most one profile of each kind.
fn registration_error(err: StoreError, profile: &str, user_id: Uuid) -> EngineError {
    if err.is_constraint_violation() {
        EngineError::Conflict(format!("user {user_id} already has a {profile} profile"))
    } else {
        err.into()
    }
}

/// The marketplace core wired over one store.
pub struct Marketplace {
    store: Arc<Store>,
    access: Access,
    registry: ShipmentRegistry,
    ledger: BidLedger,
    reputation: ReputationTracker,
    models: Arc<ModelHandle>,
}

impl Marketplace {
    pub fn new(
        store: Arc<Store>,
        distance: Arc<dyn DistanceEstimator>,
        models: Arc<ModelHandle>,
        config: &FreightConfig,
    ) -> Self {
        let scorer = Arc::new(BidScorer::new(
            models.clone(),
            Duration::from_millis(config.scoring.score_timeout_ms),
        ));
        Self {
            access: Access::new(store.clone()),
            registry: ShipmentRegistry::new(
                store.clone(),
                distance,
                Duration::from_millis(config.distance.timeout_ms),
                config.pagination.clone(),
            ),
            ledger: BidLedger::new(store.clone(), scorer),
            reputation: ReputationTracker::new(store.clone()),
            models,
            store,
        }
    }

    pub fn models(&self) -> &Arc<ModelHandle> {
        &self.models
    }

    // -- Parties ----------------------------------------------------------

    pub fn register_shipper(&self, user_id: Uuid) -> Reply<Shipper> {
        let result = self
            .store
            .insert_shipper(&Shipper::new(user_id))
            .map_err(|e| registration_error(e, "shipper", user_id));
        created(result, "Shipper registered successfully.", "Failed to register shipper.")
    }

    pub fn register_carrier(&self, user_id: Uuid) -> Reply<Carrier> {
        let result = self
            .store
            .insert_carrier(&Carrier::new(user_id))
            .map_err(|e| registration_error(e, "carrier", user_id));
        created(result, "Carrier registered successfully.", "Failed to register carrier.")
    }

    pub fn register_vehicle(&self, actor: Actor, registration_number: &str) -> Reply<Vehicle> {
        let result = self.access.carrier_of(actor).and_then(|carrier| {
            if registration_number.trim().is_empty() {
                return Err(EngineError::Validation(
                    "registration_number must not be empty".to_string(),
                ));
            }
            let vehicle = Vehicle::new(carrier.id, registration_number.trim());
            Ok(self.store.insert_vehicle(&vehicle)?)
        });
        created(result, "Vehicle registered successfully.", "Failed to register vehicle.")
    }

    pub fn get_carrier(&self, carrier_id: Uuid) -> Reply<Carrier> {
        ok(
            self.reputation.get(carrier_id),
            "Carrier fetched successfully.",
            "Failed to fetch carrier.",
        )
    }

    /// Rate a carrier after a delivery. Only shippers (or the system) rate.
    pub fn rate_carrier(&self, actor: Actor, carrier_id: Uuid, rating: f64) -> Reply<Carrier> {
        let result = match actor {
            Actor::System => Ok(()),
            _ => self.access.shipper_of(actor).map(|_| ()),
        }
        .and_then(|()| self.reputation.rate(carrier_id, rating));
        ok(result, "Carrier rated successfully.", "Failed to rate carrier.")
    }

    // -- Shipments --------------------------------------------------------

    pub async fn create_shipment(&self, actor: Actor, draft: ShipmentDraft) -> Reply<Shipment> {
        let result = match self.access.shipper_of(actor) {
            Ok(shipper) => self.registry.create(shipper.id, draft).await,
            Err(e) => Err(e),
        };
        created(result, "Shipment created successfully.", "Failed to create shipment.")
    }

    /// Open shipments are visible to every carrier so they can bid.
    pub fn get_shipment(&self, actor: Actor, id: Uuid) -> Reply<Shipment> {
        let result = self.registry.get(id).and_then(|shipment| {
            match actor {
                Actor::Carrier(_) if shipment.status == ShipmentStatus::Waiting => {
                    self.access.carrier_of(actor)?;
                }
                _ => self.access.authorize_haul(actor, &shipment)?,
            }
            Ok(shipment)
        });
        ok(result, "Shipment fetched successfully.", "Failed to fetch shipment.")
    }

    pub async fn update_shipment(
        &self,
        actor: Actor,
        id: Uuid,
        patch: ShipmentPatch,
    ) -> Reply<Shipment> {
        let result = match self.owned_shipment(actor, id) {
            Ok(_) => self.registry.update(id, patch).await,
            Err(e) => Err(e),
        };
        ok(result, "Shipment updated successfully.", "Failed to update shipment.")
    }

    pub fn transition_shipment(
        &self,
        actor: Actor,
        id: Uuid,
        event: ShipmentEvent,
    ) -> Reply<Shipment> {
        // Progress on the road is reported by whoever hauls it.
        let result = self.registry.get(id).and_then(|shipment| {
            self.access.authorize_haul(actor, &shipment)?;
            self.registry.transition(id, event)
        });
        ok(result, "Shipment status updated successfully.", "Failed to update shipment status.")
    }

    /// The acting shipper's shipments, newest first.
    pub fn list_shipments(
        &self,
        actor: Actor,
        page: Option<u32>,
        per_page: Option<u32>,
        status: Option<ShipmentStatus>,
    ) -> Reply<Page<Shipment>> {
        let page = page.unwrap_or(1);
        let per_page = per_page.unwrap_or_else(|| self.registry.default_per_page());
        let result = self
            .access
            .shipper_of(actor)
            .and_then(|shipper| self.registry.list_by_shipper(shipper.id, page, per_page, status));

        match result {
            Ok(page) => {
                let links = page.links;
                Reply::ok("Shipments fetched successfully.", page).with_links(links)
            }
            Err(err) => failure(err, "Failed to fetch shipments."),
        }
    }

    pub fn report_impediment(
        &self,
        actor: Actor,
        shipment_id: Uuid,
        report: ImpedimentReport,
    ) -> Reply<ImpedimentUpdate> {
        let result = self.registry.get(shipment_id).and_then(|shipment| {
            self.access.authorize_haul(actor, &shipment)?;
            self.registry.report_impediment(shipment_id, report)
        });
        created(result, "Impediment reported successfully.", "Failed to report impediment.")
    }

    pub fn get_impediment(&self, actor: Actor, id: Uuid) -> Reply<Impediment> {
        let result = self.registry.find_impediment(id).and_then(|impediment| {
            let shipment = self.registry.get(impediment.shipment_id)?;
            self.access.authorize_haul(actor, &shipment)?;
            Ok(impediment)
        });
        ok(result, "Impediment fetched successfully.", "Failed to fetch impediment.")
    }

    pub fn resolve_impediment(&self, actor: Actor, id: Uuid) -> Reply<ImpedimentUpdate> {
        let result = self.registry.find_impediment(id).and_then(|impediment| {
            let shipment = self.registry.get(impediment.shipment_id)?;
            self.access.authorize_haul(actor, &shipment)?;
            self.registry.resolve_impediment(id)
        });
        ok(result, "Impediment resolved successfully.", "Failed to resolve impediment.")
    }

    // -- Bids -------------------------------------------------------------

    pub fn submit_bid(
        &self,
        actor: Actor,
        shipment_id: Uuid,
        draft: BidDraft,
    ) -> Reply<BidPlacement> {
        let result = self
            .access
            .carrier_of(actor)
            .and_then(|carrier| self.ledger.submit(shipment_id, carrier.id, draft));
        created(result, "Bid placed successfully.", "Failed to place bid.")
    }

    /// Visible to the bidding carrier and to the shipper of the shipment.
    pub fn get_bid(&self, actor: Actor, id: Uuid) -> Reply<Bid> {
        let result = self.ledger.get(id).and_then(|bid| {
            if let Actor::Shipper(_) = actor {
                let shipment = self.registry.get(bid.shipment_id)?;
                self.access.authorize_shipment(actor, &shipment)?;
            } else {
                self.access.authorize_bid(actor, &bid)?;
            }
            Ok(bid)
        });
        ok(result, "Bid fetched successfully.", "Failed to fetch bid.")
    }

    pub fn list_bids(&self, actor: Actor, shipment_id: Uuid) -> Reply<Vec<Bid>> {
        let result = self
            .owned_shipment(actor, shipment_id)
            .and_then(|_| self.ledger.bids_for_shipment(shipment_id));
        ok(result, "Bids fetched successfully.", "Failed to fetch bids.")
    }

    pub fn accept_bid(&self, actor: Actor, bid_id: Uuid) -> Reply<BidAcceptance> {
        let result = self.ledger.get(bid_id).and_then(|bid| {
            self.owned_shipment(actor, bid.shipment_id)?;
            self.ledger.accept(bid_id)
        });
        ok(result, "Bid accepted successfully.", "Failed to accept bid.")
    }

    pub fn delete_bid(&self, actor: Actor, bid_id: Uuid) -> Reply<BidRemoval> {
        let result = self.ledger.get(bid_id).and_then(|bid| {
            self.access.authorize_bid(actor, &bid)?;
            self.ledger.delete(bid_id)
        });
        ok(result, "Bid deleted successfully.", "Failed to delete bid.")
    }

    pub async fn top_bid(&self, actor: Actor, shipment_id: Uuid) -> Reply<ScoredBid> {
        let result = match self.owned_shipment(actor, shipment_id) {
            Ok(_) => self.ledger.top_bid(shipment_id).await,
            Err(e) => Err(e),
        };
        ok(result, "Top bid fetched successfully.", "Failed to fetch top bid.")
    }

    pub async fn accept_top_bid(&self, actor: Actor, shipment_id: Uuid) -> Reply<BidAcceptance> {
        let result = match self.owned_shipment(actor, shipment_id) {
            Ok(_) => self.ledger.accept_top_bid(shipment_id).await,
            Err(e) => Err(e),
        };
        ok(result, "Top bid accepted successfully.", "Failed to accept top bid.")
    }

    fn owned_shipment(&self, actor: Actor, id: Uuid) -> Result<Shipment, EngineError> {
        let shipment = self.registry.get(id)?;
        self.access.authorize_shipment(actor, &shipment)?;
        Ok(shipment)
    }
}

/// Build a Marketplace from configuration.
///
/// A missing or broken model artifact does not prevent startup: the
/// marketplace comes up without a model and top-bid queries report the
/// scorer as unavailable until a valid artifact is published.
pub async fn build_marketplace(config: &FreightConfig) -> Result<Marketplace, anyhow::Error> {
    let store = Arc::new(
        Store::open(&config.store.sqlite_path)
            .with_context(|| format!("Failed to open store: {}", config.store.sqlite_path))?,
    );

    let gazetteer = GazetteerEstimator::load(&config.distance.gazetteer_path)
        .context("Failed to load gazetteer")?;
    let distance: Arc<dyn DistanceEstimator> = Arc::new(CachedEstimator::new(
        Arc::new(gazetteer),
        config.distance.cache_capacity,
        Duration::from_secs(config.distance.cache_ttl_seconds),
    ));

    let models = Arc::new(ModelHandle::new());
    let dir = ArtifactDir::new(&config.scoring.model_dir);
    let load_timeout = Duration::from_millis(config.scoring.load_timeout_ms);
    let loaded = match &config.scoring.model_version {
        Some(version) => models.reload(&dir, version, load_timeout).await,
        None => models.sync_with(&dir, load_timeout).await,
    };
    match loaded {
        Ok(_) => match models.version() {
            Some(version) => info!(%version, "Scoring model ready"),
            None => warn!(dir = %config.scoring.model_dir, "No scoring model published"),
        },
        Err(e) => warn!(error = %e, "Scoring model unavailable"),
    }

    Ok(Marketplace::new(store, distance, models, config))
}

/// Start polling the model directory for new versions. Returns `None` when
/// watching is disabled or a version is pinned in configuration.
pub fn spawn_model_watcher(
    marketplace: &Marketplace,
    config: &FreightConfig,
) -> Option<(CancellationToken, tokio::task::JoinHandle<()>)> {
    if config.scoring.watch_interval_seconds == 0 || config.scoring.model_version.is_some() {
        return None;
    }
    let watcher = ModelWatcher::new(
        marketplace.models().clone(),
        ArtifactDir::new(&config.scoring.model_dir),
        Duration::from_secs(config.scoring.watch_interval_seconds),
        Duration::from_millis(config.scoring.load_timeout_ms),
    );
    Some(watcher.spawn())
}
