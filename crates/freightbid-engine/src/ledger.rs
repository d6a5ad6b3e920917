use std::sync::Arc;

use chrono::Utc;
use freightbid_models::bid::*;
use freightbid_models::shipment::Shipment;
use freightbid_store::{truncate_to_storage, AcceptOutcome, PlaceOutcome, RemoveOutcome, Store};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::scoring::{BidScorer, ScoredBid};

/// Owns bid records: submission, acceptance, withdrawal and top-bid
/// selection.
pub struct BidLedger {
    store: Arc<Store>,
    scorer: Arc<BidScorer>,
}

impl BidLedger {
    pub fn new(store: Arc<Store>, scorer: Arc<BidScorer>) -> Self {
        Self { store, scorer }
    }

    fn shipment(&self, id: Uuid) -> Result<Shipment, EngineError> {
        self.store
            .find_shipment(id)?
            .ok_or_else(|| EngineError::not_found("shipment", id))
    }

    pub fn get(&self, id: Uuid) -> Result<Bid, EngineError> {
        self.store
            .find_bid(id)?
            .ok_or_else(|| EngineError::not_found("bid", id))
    }

    /// All bids on a shipment, oldest first.
    pub fn bids_for_shipment(&self, shipment_id: Uuid) -> Result<Vec<Bid>, EngineError> {
        self.shipment(shipment_id)?;
        Ok(self.store.bids_for_shipment(shipment_id)?)
    }

    /// Place a carrier's bid on a shipment. The bid row and both of its links
    /// are written in one transaction.
    pub fn submit(
        &self,
        shipment_id: Uuid,
        carrier_id: Uuid,
        draft: BidDraft,
    ) -> Result<BidPlacement, EngineError> {
        if draft.proposed_price <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "proposed_price must be positive, got {}",
                draft.proposed_price
            )));
        }
        let delivery = parse_delivery_date(&draft.proposed_delivery_date).ok_or_else(|| {
            EngineError::Validation(format!(
                "proposed_delivery_date '{}' is not a valid date",
                draft.proposed_delivery_date
            ))
        })?;

        let shipment = self.shipment(shipment_id)?;
        if let Some(shipped_at) = shipment.shipped_at {
            if delivery < shipped_at {
                return Err(EngineError::Validation(
                    "proposed_delivery_date is before the shipment's shipped_at".to_string(),
                ));
            }
        }

        let bid = Bid {
            id: Uuid::new_v4(),
            shipment_id,
            carrier_id,
            proposed_price: draft.proposed_price,
            proposed_vehicle: draft.proposed_vehicle,
            proposed_delivery_date: delivery,
            additional_notes: draft.additional_notes.unwrap_or_default(),
            accepted: false,
            created_at: truncate_to_storage(Utc::now()),
            accepted_at: None,
        };

        match self.store.place_bid(&bid)? {
            PlaceOutcome::Placed(placement) => {
                info!(
                    bid_id = %bid.id,
                    shipment_id = %shipment_id,
                    carrier_id = %carrier_id,
                    price = %bid.proposed_price,
                    "Bid placed"
                );
                Ok(placement)
            }
            PlaceOutcome::ShipmentMissing => Err(EngineError::not_found("shipment", shipment_id)),
            PlaceOutcome::CarrierMissing => Err(EngineError::not_found("carrier", carrier_id)),
            PlaceOutcome::VehicleNotOwned => Err(EngineError::Validation(format!(
                "vehicle {} does not belong to carrier {carrier_id}",
                bid.proposed_vehicle
            ))),
            PlaceOutcome::ShipmentClosed(status) => Err(EngineError::Conflict(format!(
                "shipment {shipment_id} is {status} and no longer takes bids"
            ))),
            PlaceOutcome::AlreadyAwarded => Err(EngineError::Conflict(format!(
                "shipment {shipment_id} already has an accepted bid"
            ))),
        }
    }

    /// Accept a bid, assigning its carrier and terms to the shipment.
    /// Accepting the same bid twice returns the current state.
    pub fn accept(&self, bid_id: Uuid) -> Result<BidAcceptance, EngineError> {
        let outcome = match self.store.accept_bid(bid_id, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) if e.is_constraint_violation() => {
                warn!(bid_id = %bid_id, error = %e, "Acceptance lost to a concurrent writer");
                return Err(EngineError::Conflict(format!(
                    "another bid was accepted while accepting {bid_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        match outcome {
            AcceptOutcome::Accepted(acceptance) => {
                info!(
                    bid_id = %bid_id,
                    shipment_id = %acceptance.shipment.id,
                    carrier_id = %acceptance.carrier.id,
                    "Bid accepted"
                );
                Ok(acceptance)
            }
            AcceptOutcome::AlreadyAccepted(acceptance) => Ok(acceptance),
            AcceptOutcome::BidMissing => Err(EngineError::not_found("bid", bid_id)),
            AcceptOutcome::OtherBidAccepted(other) => Err(EngineError::Conflict(format!(
                "bid {other} is already accepted for this shipment"
            ))),
            AcceptOutcome::ShipmentNotWaiting(status) => Err(EngineError::Conflict(format!(
                "shipment is {status}, bids can only be accepted while waiting"
            ))),
            AcceptOutcome::DeliveryBeforeShipping {
                shipped_at,
                delivery,
            } => Err(EngineError::Conflict(format!(
                "bid {bid_id} delivers at {delivery}, before the shipment ships at {shipped_at}"
            ))),
        }
    }

    /// Withdraw a bid that has not been accepted.
    pub fn delete(&self, bid_id: Uuid) -> Result<BidRemoval, EngineError> {
        match self.store.remove_bid(bid_id)? {
            RemoveOutcome::Removed(removal) => {
                info!(bid_id = %bid_id, shipment_id = %removal.shipment.id, "Bid removed");
                Ok(removal)
            }
            RemoveOutcome::Missing => Err(EngineError::not_found("bid", bid_id)),
            RemoveOutcome::Accepted => Err(EngineError::Conflict(format!(
                "bid {bid_id} is accepted and cannot be removed"
            ))),
        }
    }

    /// Rank the shipment's bids with the scoring model and return the best.
    pub async fn top_bid(&self, shipment_id: Uuid) -> Result<ScoredBid, EngineError> {
        let shipment = self.shipment(shipment_id)?;
        let bids = self.store.bids_for_shipment(shipment_id)?;
        if bids.is_empty() {
            return Err(EngineError::NoBids(shipment_id));
        }

        match self.scorer.select(&shipment, &bids).await {
            Ok(Some(top)) => {
                info!(
                    shipment_id = %shipment_id,
                    bid_id = %top.bid.id,
                    desirability = top.desirability,
                    model_version = %top.model_version,
                    candidates = bids.len(),
                    "Top bid selected"
                );
                Ok(top)
            }
            Ok(None) => Err(EngineError::NoBids(shipment_id)),
            Err(e) => {
                error!(shipment_id = %shipment_id, error = %e, "Bid scoring unavailable");
                Err(e.into())
            }
        }
    }

    /// Select the top bid and accept it.
    pub async fn accept_top_bid(&self, shipment_id: Uuid) -> Result<BidAcceptance, EngineError> {
        let top = self.top_bid(shipment_id).await?;
        self.accept(top.bid.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{bid_draft, draft, Fixture};
    use freightbid_models::bid::DELIVERY_DATE_FORMAT;
    use freightbid_models::shipment::{ShipmentPatch, ShipmentStatus};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn submit_links_bid_to_shipment_and_carrier() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let (carrier, vehicle) = fx.carrier();

        let placement = fx
            .ledger
            .submit(shipment.id, carrier.id, bid_draft(vehicle.id, dec!(1200)))
            .unwrap();
        assert_eq!(placement.shipment.bids, vec![placement.bid.id]);
        assert_eq!(placement.carrier.bids, vec![placement.bid.id]);
        assert!(!placement.bid.accepted);
    }

    #[tokio::test]
    async fn submit_validation() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let (carrier, vehicle) = fx.carrier();
        let (_, foreign_vehicle) = fx.carrier();

        let zero = bid_draft(vehicle.id, dec!(0));
        assert_eq!(
            fx.ledger.submit(shipment.id, carrier.id, zero).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let mut bad_date = bid_draft(vehicle.id, dec!(100));
        bad_date.proposed_delivery_date = "soon".to_string();
        assert_eq!(
            fx.ledger.submit(shipment.id, carrier.id, bad_date).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let foreign = bid_draft(foreign_vehicle.id, dec!(100));
        assert_eq!(
            fx.ledger.submit(shipment.id, carrier.id, foreign).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let missing = bid_draft(vehicle.id, dec!(100));
        assert_eq!(
            fx.ledger.submit(Uuid::new_v4(), carrier.id, missing.clone()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            fx.ledger.submit(shipment.id, Uuid::new_v4(), missing).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(fx.ledger.bids_for_shipment(shipment.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delivery_before_shipping_is_rejected() {
        let fx = Fixture::new();
        let mut d = draft();
        d.shipped_at = Some(Utc::now() + chrono::Duration::days(10));
        let shipment = fx.registry.create(fx.shipper().id, d).await.unwrap();
        let (carrier, vehicle) = fx.carrier();

        let err = fx
            .ledger
            .submit(shipment.id, carrier.id, bid_draft(vehicle.id, dec!(300)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn accept_then_conflict_for_others() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let (c1, v1) = fx.carrier();
        let (c2, v2) = fx.carrier();
        let first = fx.ledger.submit(shipment.id, c1.id, bid_draft(v1.id, dec!(900))).unwrap();
        let second = fx.ledger.submit(shipment.id, c2.id, bid_draft(v2.id, dec!(850))).unwrap();

        let acceptance = fx.ledger.accept(first.bid.id).unwrap();
        assert_eq!(acceptance.shipment.status, ShipmentStatus::Active);
        assert_eq!(acceptance.shipment.price, Some(dec!(900)));

        let again = fx.ledger.accept(first.bid.id).unwrap();
        assert_eq!(again, acceptance);

        let err = fx.ledger.accept(second.bid.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = fx.ledger.delete(first.bid.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn moving_ship_date_past_a_bid_blocks_its_acceptance() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let (c1, v1) = fx.carrier();
        let (c2, v2) = fx.carrier();
        let stale = fx.ledger.submit(shipment.id, c1.id, bid_draft(v1.id, dec!(500))).unwrap();

        let shipped_at = stale.bid.proposed_delivery_date + chrono::Duration::days(30);
        let patch = ShipmentPatch {
            shipped_at: Some(shipped_at),
            ..Default::default()
        };
        fx.registry.update(shipment.id, patch).await.unwrap();

        let err = fx.ledger.accept(stale.bid.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let unchanged = fx.registry.get(shipment.id).unwrap();
        assert_eq!(unchanged.status, ShipmentStatus::Waiting);
        assert_eq!(unchanged.estimated_delivery_date, None);

        // The stale bid drops out of ranking; a bid fitting the new date wins.
        assert!(matches!(
            fx.ledger.top_bid(shipment.id).await.unwrap_err(),
            EngineError::NoBids(_)
        ));
        let mut fresh = bid_draft(v2.id, dec!(900));
        fresh.proposed_delivery_date = (shipped_at + chrono::Duration::days(2))
            .format(DELIVERY_DATE_FORMAT)
            .to_string();
        let fresh = fx.ledger.submit(shipment.id, c2.id, fresh).unwrap();

        let acceptance = fx.ledger.accept_top_bid(shipment.id).await.unwrap();
        assert_eq!(acceptance.bid.id, fresh.bid.id);
        let eta = acceptance.shipment.estimated_delivery_date.unwrap();
        assert!(eta >= acceptance.shipment.shipped_at.unwrap());
    }

    #[tokio::test]
    async fn delete_twice_is_not_found() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let (carrier, vehicle) = fx.carrier();
        let placed = fx
            .ledger
            .submit(shipment.id, carrier.id, bid_draft(vehicle.id, dec!(400)))
            .unwrap();

        let removal = fx.ledger.delete(placed.bid.id).unwrap();
        assert!(removal.shipment.bids.is_empty());
        assert!(removal.carrier.bids.is_empty());
        assert_eq!(
            fx.ledger.delete(placed.bid.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn top_bid_distinguishes_no_bids_from_no_model() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let err = fx.ledger.top_bid(shipment.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NoBids(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let (carrier, vehicle) = fx.carrier();
        fx.ledger
            .submit(shipment.id, carrier.id, bid_draft(vehicle.id, dec!(400)))
            .unwrap();

        let unloaded = Fixture::without_model();
        let s2 = unloaded.registry.create(unloaded.shipper().id, draft()).await.unwrap();
        let (c2, v2) = unloaded.carrier();
        unloaded.ledger.submit(s2.id, c2.id, bid_draft(v2.id, dec!(400))).unwrap();
        let err = unloaded.ledger.top_bid(s2.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn accept_top_bid_picks_cheapest_per_km() {
        let fx = Fixture::new();
        let shipment = fx.registry.create(fx.shipper().id, draft()).await.unwrap();
        let mut ids = Vec::new();
        for price in [dec!(1500), dec!(1100), dec!(1300)] {
            let (carrier, vehicle) = fx.carrier();
            let placed = fx
                .ledger
                .submit(shipment.id, carrier.id, bid_draft(vehicle.id, price))
                .unwrap();
            ids.push(placed.bid.id);
        }

        let acceptance = fx.ledger.accept_top_bid(shipment.id).await.unwrap();
        assert_eq!(acceptance.bid.id, ids[1]);
        assert_eq!(acceptance.shipment.status, ShipmentStatus::Active);
    }
}
