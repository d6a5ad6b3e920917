use chrono::{DateTime, Utc};
use freightbid_models::bid::{Bid, BidAcceptance, BidPlacement, BidRemoval};
use freightbid_models::shipment::ShipmentStatus;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::codec::*;
use crate::error::StoreError;
use crate::parties::load_carrier;
use crate::shipments::{current_status, load_linked_shipment, load_shipment};
use crate::store::Store;

const TABLE: &str = "bids";

const BID_COLUMNS: &str = "id, shipment_id, carrier_id, proposed_price, proposed_vehicle, \
    proposed_delivery_date, additional_notes, accepted, created_at, accepted_at";

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceOutcome {
    Placed(BidPlacement),
    ShipmentMissing,
    CarrierMissing,
    VehicleNotOwned,
    /// The shipment is no longer `waiting`.
    ShipmentClosed(ShipmentStatus),
    AlreadyAwarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    Accepted(BidAcceptance),
    /// The bid was accepted earlier. Carries the current state unchanged.
    AlreadyAccepted(BidAcceptance),
    BidMissing,
    OtherBidAccepted(Uuid),
    ShipmentNotWaiting(ShipmentStatus),
    /// The shipment's `shipped_at` moved past the bid's delivery date after
    /// the bid was placed.
    DeliveryBeforeShipping {
        shipped_at: DateTime<Utc>,
        delivery: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(BidRemoval),
    Missing,
    Accepted,
}

fn read_bid(row: &Row<'_>) -> rusqlite::Result<BidRow> {
    Ok(BidRow {
        id: row.get(0)?,
        shipment_id: row.get(1)?,
        carrier_id: row.get(2)?,
        proposed_price: row.get(3)?,
        proposed_vehicle: row.get(4)?,
        proposed_delivery_date: row.get(5)?,
        additional_notes: row.get(6)?,
        accepted: row.get(7)?,
        created_at: row.get(8)?,
        accepted_at: row.get(9)?,
    })
}

struct BidRow {
    id: String,
    shipment_id: String,
    carrier_id: String,
    proposed_price: String,
    proposed_vehicle: String,
    proposed_delivery_date: String,
    additional_notes: String,
    accepted: bool,
    created_at: String,
    accepted_at: Option<String>,
}

impl TryFrom<BidRow> for Bid {
    type Error = StoreError;

    fn try_from(row: BidRow) -> Result<Self, Self::Error> {
        Ok(Bid {
            id: decode_uuid(TABLE, &row.id)?,
            shipment_id: decode_uuid(TABLE, &row.shipment_id)?,
            carrier_id: decode_uuid(TABLE, &row.carrier_id)?,
            proposed_price: decode_decimal(TABLE, &row.proposed_price)?,
            proposed_vehicle: decode_uuid(TABLE, &row.proposed_vehicle)?,
            proposed_delivery_date: decode_ts(TABLE, &row.proposed_delivery_date)?,
            additional_notes: row.additional_notes,
            accepted: row.accepted,
            created_at: decode_ts(TABLE, &row.created_at)?,
            accepted_at: decode_opt_ts(TABLE, row.accepted_at)?,
        })
    }
}

pub(crate) fn load_bid(conn: &Connection, id: Uuid) -> Result<Option<Bid>, StoreError> {
    let sql = format!("SELECT {BID_COLUMNS} FROM bids WHERE id = ?1");
    conn.query_row(&sql, params![id.to_string()], read_bid)
        .optional()?
        .map(Bid::try_from)
        .transpose()
}

fn accepted_bid_for(conn: &Connection, shipment_id: Uuid) -> Result<Option<Uuid>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT id FROM bids WHERE shipment_id = ?1 AND accepted = 1",
            params![shipment_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|r| decode_uuid(TABLE, &r)).transpose()
}

fn linked_carrier(
    conn: &Connection,
    id: Uuid,
) -> Result<freightbid_models::party::Carrier, StoreError> {
    load_carrier(conn, id)?
        .ok_or_else(|| StoreError::corrupt(TABLE, format!("dangling reference to carrier {id}")))
}

fn acceptance(conn: &Connection, bid: Bid) -> Result<BidAcceptance, StoreError> {
    Ok(BidAcceptance {
        shipment: load_linked_shipment(conn, bid.shipment_id)?,
        carrier: linked_carrier(conn, bid.carrier_id)?,
        bid,
    })
}

impl Store {
    pub fn find_bid(&self, id: Uuid) -> Result<Option<Bid>, StoreError> {
        self.with_conn(|conn| load_bid(conn, id))
    }

    /// Every bid on a shipment, oldest first.
    pub fn bids_for_shipment(&self, shipment_id: Uuid) -> Result<Vec<Bid>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {BID_COLUMNS} FROM bids WHERE shipment_id = ?1 ORDER BY created_at, rowid"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![shipment_id.to_string()], read_bid)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(Bid::try_from).collect()
        })
    }

    /// Insert a bid on a `waiting` shipment. The checks and the insert share
    /// one immediate transaction, so a concurrent acceptance either sees the
    /// bid or the bid sees the shipment closed.
    pub fn place_bid(&self, bid: &Bid) -> Result<PlaceOutcome, StoreError> {
        self.with_tx(|conn| {
            let Some(status) = current_status(conn, bid.shipment_id)? else {
                return Ok(PlaceOutcome::ShipmentMissing);
            };
            if load_carrier(conn, bid.carrier_id)?.is_none() {
                return Ok(PlaceOutcome::CarrierMissing);
            }
            let owner: Option<String> = conn
                .query_row(
                    "SELECT carrier_id FROM vehicles WHERE id = ?1",
                    params![bid.proposed_vehicle.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.as_deref() != Some(bid.carrier_id.to_string().as_str()) {
                return Ok(PlaceOutcome::VehicleNotOwned);
            }
            if status != ShipmentStatus::Waiting {
                return Ok(PlaceOutcome::ShipmentClosed(status));
            }
            if accepted_bid_for(conn, bid.shipment_id)?.is_some() {
                return Ok(PlaceOutcome::AlreadyAwarded);
            }

            conn.execute(
                &format!(
                    "INSERT INTO bids ({BID_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, NULL)"
                ),
                params![
                    bid.id.to_string(),
                    bid.shipment_id.to_string(),
                    bid.carrier_id.to_string(),
                    bid.proposed_price.to_string(),
                    bid.proposed_vehicle.to_string(),
                    encode_ts(&bid.proposed_delivery_date),
                    bid.additional_notes,
                    encode_ts(&bid.created_at),
                ],
            )?;

            let stored = load_bid(conn, bid.id)?
                .ok_or_else(|| StoreError::corrupt(TABLE, "row vanished after insert"))?;
            Ok(PlaceOutcome::Placed(BidPlacement {
                shipment: load_linked_shipment(conn, bid.shipment_id)?,
                carrier: linked_carrier(conn, bid.carrier_id)?,
                bid: stored,
            }))
        })
    }

    /// Accept a bid and award its shipment in one transaction: the bid is
    /// flagged, the shipment takes the bid's carrier, vehicle, price and
    /// delivery date and becomes `active`.
    pub fn accept_bid(&self, bid_id: Uuid, at: DateTime<Utc>) -> Result<AcceptOutcome, StoreError> {
        self.with_tx(|conn| {
            let Some(bid) = load_bid(conn, bid_id)? else {
                return Ok(AcceptOutcome::BidMissing);
            };
            if bid.accepted {
                return Ok(AcceptOutcome::AlreadyAccepted(acceptance(conn, bid)?));
            }
            if let Some(other) = accepted_bid_for(conn, bid.shipment_id)? {
                return Ok(AcceptOutcome::OtherBidAccepted(other));
            }
            let shipment = load_shipment(conn, bid.shipment_id)?.ok_or_else(|| {
                StoreError::corrupt(TABLE, format!("bid {bid_id} has no shipment"))
            })?;
            if shipment.status != ShipmentStatus::Waiting {
                return Ok(AcceptOutcome::ShipmentNotWaiting(shipment.status));
            }
            if let Some(shipped_at) = shipment.shipped_at {
                if bid.proposed_delivery_date < shipped_at {
                    return Ok(AcceptOutcome::DeliveryBeforeShipping {
                        shipped_at,
                        delivery: bid.proposed_delivery_date,
                    });
                }
            }

            let stamp = encode_ts(&at);
            conn.execute(
                "UPDATE bids SET accepted = 1, accepted_at = ?2 WHERE id = ?1 AND accepted = 0",
                params![bid_id.to_string(), stamp],
            )?;
            let awarded = conn.execute(
                "UPDATE shipments SET carrier_id = ?2, vehicle_id = ?3, price = ?4, \
                     estimated_delivery_date = ?5, status = 'active', updated_at = ?6 \
                 WHERE id = ?1 AND status = 'waiting' AND carrier_id IS NULL",
                params![
                    bid.shipment_id.to_string(),
                    bid.carrier_id.to_string(),
                    bid.proposed_vehicle.to_string(),
                    bid.proposed_price.to_string(),
                    encode_ts(&bid.proposed_delivery_date),
                    stamp,
                ],
            )?;
            if awarded != 1 {
                // Rolls back the bid flag set above.
                return Err(StoreError::corrupt(
                    "shipments",
                    format!("shipment {} waiting but already assigned", bid.shipment_id),
                ));
            }

            let accepted = load_bid(conn, bid_id)?
                .ok_or_else(|| StoreError::corrupt(TABLE, "row vanished after update"))?;
            Ok(AcceptOutcome::Accepted(acceptance(conn, accepted)?))
        })
    }

    /// Delete a bid that has not been accepted.
    pub fn remove_bid(&self, bid_id: Uuid) -> Result<RemoveOutcome, StoreError> {
        self.with_tx(|conn| {
            let Some(bid) = load_bid(conn, bid_id)? else {
                return Ok(RemoveOutcome::Missing);
            };
            if bid.accepted {
                return Ok(RemoveOutcome::Accepted);
            }
            conn.execute(
                "DELETE FROM bids WHERE id = ?1 AND accepted = 0",
                params![bid_id.to_string()],
            )?;
            Ok(RemoveOutcome::Removed(BidRemoval {
                shipment: load_linked_shipment(conn, bid.shipment_id)?,
                carrier: linked_carrier(conn, bid.carrier_id)?,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_bid, seed_carrier, seed_shipment};
    use rust_decimal_macros::dec;

    #[test]
    fn placed_bid_is_linked_both_ways() {
        let store = Store::open_in_memory().unwrap();
        let shipment = seed_shipment(&store).unwrap();
        let (carrier, vehicle) = seed_carrier(&store).unwrap();

        let bid = make_bid(shipment.id, carrier.id, vehicle.id, dec!(1500.00));
        let PlaceOutcome::Placed(placement) = store.place_bid(&bid).unwrap() else {
            panic!("expected placement");
        };
        assert_eq!(placement.shipment.bids, vec![bid.id]);
        assert_eq!(placement.carrier.bids, vec![bid.id]);
        assert_eq!(placement.bid.proposed_price, dec!(1500.00));
        assert_eq!(store.bids_for_shipment(shipment.id).unwrap(), vec![placement.bid]);
    }

    #[test]
    fn foreign_vehicle_is_refused() {
        let store = Store::open_in_memory().unwrap();
        let shipment = seed_shipment(&store).unwrap();
        let (carrier, _) = seed_carrier(&store).unwrap();
        let (_, other_vehicle) = seed_carrier(&store).unwrap();

        let bid = make_bid(shipment.id, carrier.id, other_vehicle.id, dec!(900));
        assert_eq!(store.place_bid(&bid).unwrap(), PlaceOutcome::VehicleNotOwned);
        assert!(store.find_bid(bid.id).unwrap().is_none());
    }

    #[test]
    fn accept_awards_shipment() {
        let store = Store::open_in_memory().unwrap();
        let shipment = seed_shipment(&store).unwrap();
        let (carrier, vehicle) = seed_carrier(&store).unwrap();
        let bid = make_bid(shipment.id, carrier.id, vehicle.id, dec!(1200.50));
        store.place_bid(&bid).unwrap();

        let AcceptOutcome::Accepted(acceptance) = store.accept_bid(bid.id, Utc::now()).unwrap()
        else {
            panic!("expected acceptance");
        };
        assert!(acceptance.bid.accepted);
        assert!(acceptance.bid.accepted_at.is_some());
        assert_eq!(acceptance.shipment.status, ShipmentStatus::Active);
        assert_eq!(acceptance.shipment.carrier_id, Some(carrier.id));
        assert_eq!(acceptance.shipment.vehicle_id, Some(vehicle.id));
        assert_eq!(acceptance.shipment.price, Some(dec!(1200.50)));

        let AcceptOutcome::AlreadyAccepted(again) = store.accept_bid(bid.id, Utc::now()).unwrap()
        else {
            panic!("expected idempotent acceptance");
        };
        assert_eq!(again, acceptance);
    }

    #[test]
    fn bid_overtaken_by_a_later_ship_date_is_not_accepted() {
        let store = Store::open_in_memory().unwrap();
        let mut shipment = seed_shipment(&store).unwrap();
        let (carrier, vehicle) = seed_carrier(&store).unwrap();
        let bid = make_bid(shipment.id, carrier.id, vehicle.id, dec!(700));
        store.place_bid(&bid).unwrap();

        let shipped_at =
            truncate_to_storage(bid.proposed_delivery_date + chrono::Duration::days(30));
        shipment.shipped_at = Some(shipped_at);
        store.update_waiting_shipment(&shipment).unwrap();

        let outcome = store.accept_bid(bid.id, Utc::now()).unwrap();
        let AcceptOutcome::DeliveryBeforeShipping { shipped_at: seen, .. } = outcome else {
            panic!("expected a schedule refusal, got {outcome:?}");
        };
        assert_eq!(seen, shipped_at);

        let stored = store.find_shipment(shipment.id).unwrap().unwrap();
        assert_eq!(stored.status, ShipmentStatus::Waiting);
        assert_eq!(stored.estimated_delivery_date, None);
        assert!(!store.find_bid(bid.id).unwrap().unwrap().accepted);
    }

    #[test]
    fn second_bid_cannot_be_accepted() {
        let store = Store::open_in_memory().unwrap();
        let shipment = seed_shipment(&store).unwrap();
        let (c1, v1) = seed_carrier(&store).unwrap();
        let (c2, v2) = seed_carrier(&store).unwrap();
        let first = make_bid(shipment.id, c1.id, v1.id, dec!(1000));
        let second = make_bid(shipment.id, c2.id, v2.id, dec!(950));
        store.place_bid(&first).unwrap();
        store.place_bid(&second).unwrap();

        store.accept_bid(first.id, Utc::now()).unwrap();
        assert_eq!(
            store.accept_bid(second.id, Utc::now()).unwrap(),
            AcceptOutcome::OtherBidAccepted(first.id)
        );

        let late = make_bid(shipment.id, c2.id, v2.id, dec!(800));
        assert_eq!(
            store.place_bid(&late).unwrap(),
            PlaceOutcome::ShipmentClosed(ShipmentStatus::Active)
        );
    }

    #[test]
    fn remove_keeps_accepted_bids() {
        let store = Store::open_in_memory().unwrap();
        let shipment = seed_shipment(&store).unwrap();
        let (carrier, vehicle) = seed_carrier(&store).unwrap();
        let keep = make_bid(shipment.id, carrier.id, vehicle.id, dec!(700));
        let drop = make_bid(shipment.id, carrier.id, vehicle.id, dec!(750));
        store.place_bid(&keep).unwrap();
        store.place_bid(&drop).unwrap();

        let RemoveOutcome::Removed(removal) = store.remove_bid(drop.id).unwrap() else {
            panic!("expected removal");
        };
        assert_eq!(removal.shipment.bids, vec![keep.id]);
        assert_eq!(removal.carrier.bids, vec![keep.id]);

        store.accept_bid(keep.id, Utc::now()).unwrap();
        assert_eq!(store.remove_bid(keep.id).unwrap(), RemoveOutcome::Accepted);
        assert_eq!(store.remove_bid(drop.id).unwrap(), RemoveOutcome::Missing);
    }
}
