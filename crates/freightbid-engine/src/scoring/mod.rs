//! Top-bid selection.
//!
//! Each bid is turned into a fixed nine-feature vector and scored by the
//! live model. The highest desirability wins; ties go to the lower price,
//! then the earlier bid, then the lower id.

pub mod artifact;
pub mod handle;
pub mod watcher;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use freightbid_models::bid::Bid;
use freightbid_models::shipment::Shipment;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ScoringError;
use handle::ModelHandle;

pub const FEATURE_COUNT: usize = 9;

/// Feature order every model artifact must declare.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "distance",
    "cargo_load",
    "price",
    "delivery_duration",
    "start_weekday",
    "delivery_weekday",
    "start_month",
    "delivery_month",
    "price_per_km",
];

pub type FeatureVector = [f64; FEATURE_COUNT];

/// A pretrained desirability function. Mockable for testing.
pub trait ScoringModel: Send + Sync + 'static {
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError>;
}

/// Whole days between two instants, rounded toward negative infinity.
fn whole_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().div_euclid(86_400)
}

/// Feature vector for one bid, or `None` when the bid cannot be scored:
/// non-positive distance, a price that does not fit in an `f64`, or a
/// delivery date the shipment's `shipped_at` has since moved past.
pub fn derive_features(shipment: &Shipment, bid: &Bid) -> Option<FeatureVector> {
    let distance = shipment.distance;
    if !(distance.is_finite() && distance > 0.0) {
        return None;
    }
    if shipment.shipped_at.is_some_and(|shipped| bid.proposed_delivery_date < shipped) {
        return None;
    }
    let price = bid.proposed_price.to_f64()?;
    let start = shipment.start_time();
    let delivery = bid.proposed_delivery_date;

    Some([
        distance,
        shipment.cargo_load,
        price,
        whole_days(start, delivery) as f64,
        start.weekday().num_days_from_monday() as f64,
        delivery.weekday().num_days_from_monday() as f64,
        start.month() as f64,
        delivery.month() as f64,
        price / distance,
    ])
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredBid {
    pub bid: Bid,
    pub desirability: f64,
    pub model_version: String,
}

/// Ranks the bids of a shipment with the model behind a [`ModelHandle`].
pub struct BidScorer {
    handle: Arc<ModelHandle>,
    timeout: Duration,
}

impl BidScorer {
    pub fn new(handle: Arc<ModelHandle>, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Pick the best bid. `Ok(None)` means no bid was scorable; any problem
    /// with the model is an error, never a fallback pick.
    pub async fn select(
        &self,
        shipment: &Shipment,
        bids: &[Bid],
    ) -> Result<Option<ScoredBid>, ScoringError> {
        let active = self.handle.current().ok_or(ScoringError::NotLoaded)?;

        let candidates: Vec<(&Bid, FeatureVector)> = bids
            .iter()
            .filter_map(|bid| derive_features(shipment, bid).map(|f| (bid, f)))
            .collect();
        if candidates.len() < bids.len() {
            debug!(
                shipment_id = %shipment.id,
                excluded = bids.len() - candidates.len(),
                "Bids excluded from scoring"
            );
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let model = Arc::clone(&active.model);
        let vectors: Vec<FeatureVector> = candidates.iter().map(|(_, f)| *f).collect();
        let job = tokio::task::spawn_blocking(move || {
            vectors
                .iter()
                .map(|v| model.score(v))
                .collect::<Result<Vec<f64>, ScoringError>>()
        });

        let scores = match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(scores)) => scores?,
            Ok(Err(join)) => {
                return Err(ScoringError::Malformed(format!("scoring task failed: {join}")))
            }
            Err(_) => {
                warn!(shipment_id = %shipment.id, version = %active.version, "Scoring timed out");
                return Err(ScoringError::Timeout(self.timeout.as_millis() as u64));
            }
        };
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ScoringError::NonFinite);
        }

        let best = candidates
            .iter()
            .zip(&scores)
            .max_by(|(a, sa), (b, sb)| rank(a.0, **sa, b.0, **sb))
            .map(|((bid, _), score)| ScoredBid {
                bid: (*bid).clone(),
                desirability: *score,
                model_version: active.version.clone(),
            });
        Ok(best)
    }
}

/// `Greater` means `a` is the better pick.
fn rank(a: &Bid, score_a: f64, b: &Bid, score_b: f64) -> Ordering {
    score_a
        .total_cmp(&score_b)
        .then_with(|| b.proposed_price.cmp(&a.proposed_price))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}
