pub mod access;
pub mod distance;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod reputation;
pub mod scoring;

pub mod test_support;

pub use access::Access;
pub use distance::{CachedEstimator, DistanceEstimator, GazetteerEstimator};
pub use error::{DistanceError, EngineError, ErrorKind, ScoringError};
pub use ledger::BidLedger;
pub use registry::ShipmentRegistry;
pub use reputation::ReputationTracker;
pub use scoring::artifact::{ArtifactDir, ModelArtifact};
pub use scoring::handle::ModelHandle;
pub use scoring::watcher::ModelWatcher;
pub use scoring::{BidScorer, ScoredBid, ScoringModel};
