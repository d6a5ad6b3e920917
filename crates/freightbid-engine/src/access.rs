//! Ownership checks. Authentication happens upstream; here the acting user
//! is only compared against the owner of the resource being touched.

use std::sync::Arc;

use freightbid_models::bid::Bid;
use freightbid_models::party::{Actor, Carrier, Shipper};
use freightbid_models::shipment::Shipment;
use freightbid_store::Store;
use uuid::Uuid;

use crate::error::EngineError;

pub struct Access {
    store: Arc<Store>,
}

impl Access {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The shipper profile behind a shipper actor.
    pub fn shipper_of(&self, actor: Actor) -> Result<Shipper, EngineError> {
        match actor {
            Actor::Shipper(user_id) => self.store.find_shipper_by_user(user_id)?.ok_or_else(|| {
                EngineError::AuthorizationMismatch(format!("user {user_id} has no shipper profile"))
            }),
            other => Err(EngineError::AuthorizationMismatch(format!(
                "{other:?} is not a shipper"
            ))),
        }
    }

    /// The carrier profile behind a carrier actor.
    pub fn carrier_of(&self, actor: Actor) -> Result<Carrier, EngineError> {
        match actor {
            Actor::Carrier(user_id) => self.store.find_carrier_by_user(user_id)?.ok_or_else(|| {
                EngineError::AuthorizationMismatch(format!("user {user_id} has no carrier profile"))
            }),
            other => Err(EngineError::AuthorizationMismatch(format!(
                "{other:?} is not a carrier"
            ))),
        }
    }

    /// Only the posting shipper (or the system) may act on a shipment.
    pub fn authorize_shipment(&self, actor: Actor, shipment: &Shipment) -> Result<(), EngineError> {
        if actor == Actor::System {
            return Ok(());
        }
        let shipper = self.shipper_of(actor)?;
        owned_by(shipper.id, shipment.shipper_id, "shipment", shipment.id)
    }

    /// Only the bidding carrier (or the system) may act on a bid.
    pub fn authorize_bid(&self, actor: Actor, bid: &Bid) -> Result<(), EngineError> {
        if actor == Actor::System {
            return Ok(());
        }
        let carrier = self.carrier_of(actor)?;
        owned_by(carrier.id, bid.carrier_id, "bid", bid.id)
    }

    /// Shipment in transit: its shipper or the carrier hauling it.
    pub fn authorize_haul(&self, actor: Actor, shipment: &Shipment) -> Result<(), EngineError> {
        match actor {
            Actor::Carrier(_) => {
                let carrier = self.carrier_of(actor)?;
                match shipment.carrier_id {
                    Some(assigned) => owned_by(carrier.id, assigned, "shipment", shipment.id),
                    None => Err(EngineError::AuthorizationMismatch(format!(
                        "shipment {} has no assigned carrier",
                        shipment.id
                    ))),
                }
            }
            _ => self.authorize_shipment(actor, shipment),
        }
    }
}

fn owned_by(actor_id: Uuid, owner_id: Uuid, what: &str, id: Uuid) -> Result<(), EngineError> {
    if actor_id == owner_id {
        Ok(())
    } else {
        Err(EngineError::AuthorizationMismatch(format!("{what} {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use freightbid_store::test_support::{seed_carrier, seed_shipment, seed_shipper};

    #[test]
    fn shipment_owner_and_system_pass() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let shipment = seed_shipment(&store).unwrap();
        let owner = store.find_shipper(shipment.shipper_id).unwrap().unwrap();
        let access = Access::new(store.clone());

        access.authorize_shipment(Actor::Shipper(owner.user_id), &shipment).unwrap();
        access.authorize_shipment(Actor::System, &shipment).unwrap();
    }

    #[test]
    fn other_shipper_and_carrier_are_refused() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let shipment = seed_shipment(&store).unwrap();
        let stranger = seed_shipper(&store).unwrap();
        let access = Access::new(store.clone());

        let err = access
            .authorize_shipment(Actor::Shipper(stranger.user_id), &shipment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationMismatch);

        let err = access
            .authorize_shipment(Actor::Carrier(stranger.user_id), &shipment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationMismatch);
    }

    #[test]
    fn only_the_assigned_carrier_hauls() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut shipment = seed_shipment(&store).unwrap();
        let (hauler, _) = seed_carrier(&store).unwrap();
        let (other, _) = seed_carrier(&store).unwrap();
        let access = Access::new(store.clone());

        let err = access
            .authorize_haul(Actor::Carrier(hauler.user_id), &shipment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationMismatch);

        shipment.carrier_id = Some(hauler.id);
        access.authorize_haul(Actor::Carrier(hauler.user_id), &shipment).unwrap();
        assert!(access.authorize_haul(Actor::Carrier(other.user_id), &shipment).is_err());
    }
}
