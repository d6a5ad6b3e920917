use freightbid_models::shipment::{ShipmentEvent, ShipmentStatus};
use freightbid_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of an `EngineError`, used by callers that only need
/// to map failures onto response outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    AuthorizationMismatch,
    ServiceUnavailable,
    InternalInvariantViolation,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("No bids to select from for shipment {0}")]
    NoBids(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot {event} a shipment that is {from}")]
    InvalidTransition {
        from: ShipmentStatus,
        event: ShipmentEvent,
    },

    #[error("Actor does not own {0}")]
    AuthorizationMismatch(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::InvalidLocation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } | EngineError::NoBids(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) | EngineError::InvalidTransition { .. } => ErrorKind::Conflict,
            EngineError::AuthorizationMismatch(_) => ErrorKind::AuthorizationMismatch,
            EngineError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            EngineError::Store(e) => match e {
                StoreError::Unavailable(_) => ErrorKind::ServiceUnavailable,
                _ => ErrorKind::InternalInvariantViolation,
            },
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: Uuid) -> Self {
        EngineError::NotFound { entity, id }
    }
}

/// Failure of a distance lookup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
    #[error("Unknown postal code {postal_code} in {country}")]
    UnknownPlace {
        postal_code: String,
        country: String,
    },

    #[error("Places resolve to the same point")]
    ZeroDistance,

    #[error("Gazetteer unavailable: {0}")]
    Unavailable(String),

    #[error("Distance lookup timed out after {0} ms")]
    Timeout(u64),
}

impl From<DistanceError> for EngineError {
    fn from(err: DistanceError) -> Self {
        match err {
            DistanceError::UnknownPlace { .. } | DistanceError::ZeroDistance => {
                EngineError::InvalidLocation(err.to_string())
            }
            DistanceError::Unavailable(_) | DistanceError::Timeout(_) => {
                EngineError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

/// Failure to load or evaluate the bid scoring model.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("No scoring model loaded")]
    NotLoaded,

    #[error("Model artifact {path} unreadable: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model artifact malformed: {0}")]
    Malformed(String),

    #[error("Model expects features {expected:?}, got {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Model produced a non-finite score")]
    NonFinite,

    #[error("Scoring timed out after {0} ms")]
    Timeout(u64),
}

impl From<ScoringError> for EngineError {
    fn from(err: ScoringError) -> Self {
        EngineError::ServiceUnavailable(err.to_string())
    }
}
