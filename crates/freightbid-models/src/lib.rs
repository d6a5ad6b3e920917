pub mod bid;
pub mod config;
pub mod envelope;
pub mod party;
pub mod schema;
pub mod shipment;

pub use bid::{Bid, BidAcceptance, BidDraft, BidPlacement, BidRemoval};
pub use config::{DistanceConfig, FreightConfig, PaginationConfig, ScoringConfig, StoreConfig};
pub use envelope::{Envelope, Outcome, Page, PageLinks, PageRef, Reply};
pub use party::{Actor, Carrier, Shipper, Vehicle};
pub use shipment::{
    Impediment, ImpedimentKind, ImpedimentReport, ImpedimentUpdate, Place, Shipment,
    ShipmentDraft, ShipmentEvent, ShipmentPatch, ShipmentStatus, TransportMode,
};
