//! Great-circle distance between two postal places.
//!
//! The production estimator resolves postal codes through a GeoNames
//! postal-code dump (tab separated: country, postal code, place name, five
//! admin columns, latitude, longitude, accuracy) loaded once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use freightbid_models::shipment::Place;
use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::error::DistanceError;

/// Mean Earth radius in kilometers (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

const LATITUDE_COLUMN: usize = 9;
const LONGITUDE_COLUMN: usize = 10;

/// Trait for distance lookups. Mockable for testing.
#[async_trait]
pub trait DistanceEstimator: Send + Sync {
    /// Distance in kilometers. Implementations never return a non-positive
    /// value as `Ok`.
    async fn distance(&self, origin: &Place, destination: &Place) -> Result<f64, DistanceError>;
}

/// Haversine distance between two `(latitude, longitude)` points in degrees.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Run a lookup under a deadline. A timeout is reported as
/// `DistanceError::Timeout` rather than blocking the caller.
pub async fn measure(
    estimator: &dyn DistanceEstimator,
    origin: &Place,
    destination: &Place,
    timeout: Duration,
) -> Result<f64, DistanceError> {
    match tokio::time::timeout(timeout, estimator.distance(origin, destination)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(%origin, %destination, timeout_ms = timeout.as_millis() as u64, "Distance lookup timed out");
            Err(DistanceError::Timeout(timeout.as_millis() as u64))
        }
    }
}

/// Postal-code coordinates keyed by `(country, postal code)`.
pub struct GazetteerEstimator {
    coordinates: HashMap<(String, String), (f64, f64)>,
}

impl GazetteerEstimator {
    /// Load a GeoNames postal-code file. Codes listed more than once (one row
    /// per locality) resolve to the mean of their coordinates.
    pub fn load(path: &str) -> Result<Self, DistanceError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DistanceError::Unavailable(format!("{path}: {e}")))?;
        let estimator = Self::parse(&content);
        info!(path, places = estimator.len(), "Gazetteer loaded");
        Ok(estimator)
    }

    pub fn parse(content: &str) -> Self {
        let mut sums: HashMap<(String, String), (f64, f64, u32)> = HashMap::new();
        let mut skipped = 0usize;

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let cols: Vec<&str> = line.split('\t').collect();
            let parsed = (cols.len() > LONGITUDE_COLUMN)
                .then(|| {
                    let lat = cols[LATITUDE_COLUMN].trim().parse::<f64>().ok()?;
                    let lon = cols[LONGITUDE_COLUMN].trim().parse::<f64>().ok()?;
                    Some((lat, lon))
                })
                .flatten();
            let Some((lat, lon)) = parsed else {
                skipped += 1;
                continue;
            };

            let key = (cols[0].trim().to_uppercase(), cols[1].trim().to_string());
            let entry = sums.entry(key).or_insert((0.0, 0.0, 0));
            entry.0 += lat;
            entry.1 += lon;
            entry.2 += 1;
        }

        if skipped > 0 {
            debug!(skipped, "Gazetteer rows without coordinates ignored");
        }

        Self {
            coordinates: sums
                .into_iter()
                .map(|(k, (lat, lon, n))| (k, (lat / n as f64, lon / n as f64)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    fn locate(&self, place: &Place) -> Result<(f64, f64), DistanceError> {
        let place = place.normalized();
        self.coordinates
            .get(&(place.country.clone(), place.postal_code.clone()))
            .copied()
            .ok_or(DistanceError::UnknownPlace {
                postal_code: place.postal_code,
                country: place.country,
            })
    }
}

#[async_trait]
impl DistanceEstimator for GazetteerEstimator {
    async fn distance(&self, origin: &Place, destination: &Place) -> Result<f64, DistanceError> {
        let km = haversine_km(self.locate(origin)?, self.locate(destination)?);
        if km > 0.0 && km.is_finite() {
            Ok(km)
        } else {
            Err(DistanceError::ZeroDistance)
        }
    }
}

/// Caches successful lookups of an inner estimator in a moka TTL cache.
pub struct CachedEstimator {
    inner: Arc<dyn DistanceEstimator>,
    cache: Cache<(String, String), f64>,
}

impl CachedEstimator {
    pub fn new(inner: Arc<dyn DistanceEstimator>, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl DistanceEstimator for CachedEstimator {
    async fn distance(&self, origin: &Place, destination: &Place) -> Result<f64, DistanceError> {
        let key = (origin.normalized().to_string(), destination.normalized().to_string());
        if let Some(km) = self.cache.get(&key).await {
            return Ok(km);
        }
        let km = self.inner.distance(origin, destination).await?;
        self.cache.insert(key, km).await;
        Ok(km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE: &str = "\
IN\t560001\tBangalore G.P.O.\tKarnataka\t19\tBangalore\t583\t\t\t12.9716\t77.5946\t4
IN\t560001\tMG Road\tKarnataka\t19\tBangalore\t583\t\t\t12.9756\t77.6066\t4
IN\t400001\tMumbai G.P.O.\tMaharashtra\t16\tMumbai\t518\t\t\t18.9388\t72.8354\t4
IN\t110001\tConnaught Place\tDelhi\t07\tNew Delhi\t\t\t\t\t\t
";

    fn gazetteer() -> GazetteerEstimator {
        GazetteerEstimator::parse(SAMPLE)
    }

    #[test]
    fn haversine_known_distance() {
        // Bangalore to Mumbai is about 836 km great-circle.
        let km = haversine_km((12.9716, 77.5946), (18.9388, 72.8354));
        assert!((km - 836.0).abs() < 1.0, "got {km}");
        assert_eq!(haversine_km((10.0, 10.0), (10.0, 10.0)), 0.0);
    }

    #[test]
    fn duplicate_codes_are_averaged_and_blank_rows_skipped() {
        let g = gazetteer();
        assert_eq!(g.len(), 2);
        let (lat, lon) = g.locate(&Place::new("560001", "in")).unwrap();
        assert!((lat - 12.9736).abs() < 1e-9);
        assert!((lon - 77.6006).abs() < 1e-9);
        assert!(g.locate(&Place::new("110001", "IN")).is_err());
    }

    #[tokio::test]
    async fn unknown_place_is_rejected() {
        let err = gazetteer()
            .distance(&Place::new("560001", "IN"), &Place::new("999999", "IN"))
            .await
            .unwrap_err();
        assert!(matches!(err, DistanceError::UnknownPlace { .. }));
    }

    #[tokio::test]
    async fn same_place_is_zero_distance() {
        let place = Place::new("400001", "IN");
        let err = gazetteer().distance(&place, &place).await.unwrap_err();
        assert_eq!(err, DistanceError::ZeroDistance);
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DistanceEstimator for Counting {
        async fn distance(&self, _: &Place, _: &Place) -> Result<f64, DistanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(100.0)
        }
    }

    #[tokio::test]
    async fn cache_serves_repeat_lookups() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEstimator::new(inner.clone(), 100, Duration::from_secs(60));
        let a = Place::new("560001", "IN");
        let b = Place::new("400001", "IN");

        assert_eq!(cached.distance(&a, &b).await.unwrap(), 100.0);
        assert_eq!(cached.distance(&a, &b).await.unwrap(), 100.0);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    struct Stalled;

    #[async_trait]
    impl DistanceEstimator for Stalled {
        async fn distance(&self, _: &Place, _: &Place) -> Result<f64, DistanceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn measure_times_out() {
        let err = measure(
            &Stalled,
            &Place::new("560001", "IN"),
            &Place::new("400001", "IN"),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert_eq!(err, DistanceError::Timeout(20));
    }
}
