pub mod bids;
mod codec;
pub mod error;
pub mod parties;
pub mod shipments;
pub mod store;

pub mod test_support;

pub use bids::{AcceptOutcome, PlaceOutcome, RemoveOutcome};
pub use codec::truncate_to_storage;
pub use error::StoreError;
pub use shipments::{Guarded, ImpedimentResolution};
pub use store::Store;
