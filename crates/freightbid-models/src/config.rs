use serde::{Deserialize, Serialize};

/// Top-level configuration for the marketplace core.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FreightConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub distance: DistanceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/freightbid.db".to_string(),
        }
    }
}

/// Configuration for the postal-code distance estimator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistanceConfig {
    /// Tab-separated postal-code gazetteer (GeoNames layout).
    pub gazetteer_path: String,
    /// Upper bound for a single distance estimate.
    #[serde(default = "default_distance_timeout")]
    pub timeout_ms: u64,
    /// Maximum number of memoized place pairs.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            gazetteer_path: "data/postal_codes.tsv".to_string(),
            timeout_ms: default_distance_timeout(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

/// Configuration for the bid scoring oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    /// Directory holding `model-<version>.json` artifacts and the `CURRENT` pointer.
    pub model_dir: String,
    /// Pin a model version. When unset the version named in `CURRENT` is used.
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_score_timeout")]
    pub score_timeout_ms: u64,
    /// How often the watcher polls `CURRENT`. Zero disables watching.
    #[serde(default = "default_watch_interval")]
    pub watch_interval_seconds: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_dir: "models".to_string(),
            model_version: None,
            load_timeout_ms: default_load_timeout(),
            score_timeout_ms: default_score_timeout(),
            watch_interval_seconds: default_watch_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

fn default_distance_timeout() -> u64 {
    2_000
}
fn default_cache_capacity() -> u64 {
    10_000
}
fn default_cache_ttl() -> u64 {
    3_600
}
fn default_load_timeout() -> u64 {
    5_000
}
fn default_score_timeout() -> u64 {
    2_000
}
fn default_watch_interval() -> u64 {
    30
}
fn default_per_page() -> u32 {
    10
}
fn default_max_per_page() -> u32 {
    100
}
