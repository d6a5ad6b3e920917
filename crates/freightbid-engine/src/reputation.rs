use std::sync::Arc;

use freightbid_models::party::{Carrier, MAX_RATING, MIN_RATING};
use freightbid_store::Store;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;

/// Maintains each carrier's running-mean rating.
pub struct ReputationTracker {
    store: Arc<Store>,
}

impl ReputationTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Fold `rating` into the carrier's mean. Ratings are applied in arrival
    /// order: `[4, 5, 3]` gives 4.0, then 4.5, then 4.0.
    pub fn rate(&self, carrier_id: Uuid, rating: f64) -> Result<Carrier, EngineError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(EngineError::Validation(format!(
                "rating must be within [{MIN_RATING}, {MAX_RATING}], got {rating}"
            )));
        }

        let carrier = self
            .store
            .apply_rating(carrier_id, rating)?
            .ok_or_else(|| EngineError::not_found("carrier", carrier_id))?;
        info!(
            carrier_id = %carrier_id,
            rating = ?carrier.rating,
            total_ratings = carrier.total_ratings,
            "Carrier rated"
        );
        Ok(carrier)
    }

    pub fn get(&self, carrier_id: Uuid) -> Result<Carrier, EngineError> {
        self.store
            .find_carrier(carrier_id)?
            .ok_or_else(|| EngineError::not_found("carrier", carrier_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use freightbid_store::test_support::seed_carrier;

    fn tracker() -> (ReputationTracker, Carrier) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (carrier, _) = seed_carrier(&store).unwrap();
        (ReputationTracker::new(store), carrier)
    }

    #[test]
    fn running_mean_example() {
        let (tracker, carrier) = tracker();
        let mut seen = Vec::new();
        for r in [4.0, 5.0, 3.0] {
            seen.push(tracker.rate(carrier.id, r).unwrap().rating.unwrap());
        }
        assert_eq!(seen, vec![4.0, 4.5, 4.0]);
        assert_eq!(tracker.get(carrier.id).unwrap().total_ratings, 3);
    }

    #[test]
    fn out_of_range_and_nan_are_rejected() {
        let (tracker, carrier) = tracker();
        for bad in [0.5, 5.01, f64::NAN, f64::INFINITY] {
            let err = tracker.rate(carrier.id, bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(tracker.get(carrier.id).unwrap().rating, None);
    }

    #[test]
    fn unknown_carrier() {
        let (tracker, _) = tracker();
        let err = tracker.rate(Uuid::new_v4(), 3.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
