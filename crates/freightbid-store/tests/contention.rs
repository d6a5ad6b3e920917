//! Concurrent writers against one file-backed marketplace database.
//!
//! Each thread opens its own handle, the way separate processes would, so
//! contention is resolved by SQLite's WAL locking rather than the in-process
//! mutex.
//!
//! Run with:
//! ```bash
//! cargo test -p freightbid-store --test contention
//! ```

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use freightbid_models::ShipmentStatus;
use freightbid_store::test_support::{make_bid, seed_carrier, seed_shipment};
use freightbid_store::{AcceptOutcome, PlaceOutcome, Store};
use rust_decimal::Decimal;

/// Many carriers bid at once. Every bid lands and the shipment lists them all.
#[test]
fn concurrent_bids_are_all_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bids.db");
    let path_str = path.to_str().unwrap().to_string();

    let store = Store::open(&path_str).unwrap();
    let shipment = seed_shipment(&store).unwrap();
    let carriers: Vec<_> = (0..8).map(|_| seed_carrier(&store).unwrap()).collect();

    let barrier = Arc::new(Barrier::new(carriers.len()));
    let handles: Vec<_> = carriers
        .into_iter()
        .enumerate()
        .map(|(i, (carrier, vehicle))| {
            let b = barrier.clone();
            let p = path_str.clone();
            let shipment_id = shipment.id;
            thread::spawn(move || {
                let store = Store::open(&p).unwrap();
                b.wait();
                let mut placed = Vec::new();
                for j in 0..5 {
                    let price = Decimal::from(1000 + i * 10 + j);
                    let bid = make_bid(shipment_id, carrier.id, vehicle.id, price);
                    match store.place_bid(&bid).unwrap() {
                        PlaceOutcome::Placed(p) => placed.push(p.bid.id),
                        other => panic!("bid refused: {other:?}"),
                    }
                }
                placed
            })
        })
        .collect();

    let mut expected = Vec::new();
    for handle in handles {
        expected.extend(handle.join().expect("bidder panicked"));
    }

    let stored = store.find_shipment(shipment.id).unwrap().unwrap();
    assert_eq!(stored.bids.len(), 40);
    for id in expected {
        assert!(stored.bids.contains(&id), "bid {id} missing from shipment");
    }
}

/// Racing acceptances of different bids on one shipment produce exactly one
/// winner, and the shipment carries that winner's terms.
#[test]
fn concurrent_accepts_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accept.db");
    let path_str = path.to_str().unwrap().to_string();

    let store = Store::open(&path_str).unwrap();
    let shipment = seed_shipment(&store).unwrap();
    let bids: Vec<_> = (0..6)
        .map(|i| {
            let (carrier, vehicle) = seed_carrier(&store).unwrap();
            let bid = make_bid(shipment.id, carrier.id, vehicle.id, Decimal::from(500 + i));
            store.place_bid(&bid).unwrap();
            bid
        })
        .collect();

    let barrier = Arc::new(Barrier::new(bids.len()));
    let handles: Vec<_> = bids
        .iter()
        .map(|bid| {
            let b = barrier.clone();
            let p = path_str.clone();
            let bid_id = bid.id;
            thread::spawn(move || {
                let store = Store::open(&p).unwrap();
                b.wait();
                store.accept_bid(bid_id, Utc::now()).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<AcceptOutcome> = handles
        .into_iter()
        .map(|h| h.join().expect("acceptor panicked"))
        .collect();

    let winners: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            AcceptOutcome::Accepted(a) => Some(a.bid.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(winners.len(), 1, "outcomes: {outcomes:?}");
    let winner = &winners[0];

    for outcome in &outcomes {
        match outcome {
            AcceptOutcome::Accepted(_) => {}
            AcceptOutcome::OtherBidAccepted(id) => assert_eq!(*id, winner.id),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    let stored = store.find_shipment(shipment.id).unwrap().unwrap();
    assert_eq!(stored.status, ShipmentStatus::Active);
    assert_eq!(stored.carrier_id, Some(winner.carrier_id));
    assert_eq!(stored.price, Some(winner.proposed_price));

    let accepted: Vec<_> = store
        .bids_for_shipment(shipment.id)
        .unwrap()
        .into_iter()
        .filter(|b| b.accepted)
        .collect();
    assert_eq!(accepted.len(), 1);
}

/// Ratings submitted from several handles are all folded into the mean.
#[test]
fn concurrent_ratings_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ratings.db");
    let path_str = path.to_str().unwrap().to_string();

    let store = Store::open(&path_str).unwrap();
    let (carrier, _) = seed_carrier(&store).unwrap();

    let threads = 4;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let b = barrier.clone();
            let p = path_str.clone();
            let carrier_id = carrier.id;
            thread::spawn(move || {
                let store = Store::open(&p).unwrap();
                b.wait();
                for _ in 0..per_thread {
                    store.apply_rating(carrier_id, 4.0).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("rater panicked");
    }

    let rated = store.find_carrier(carrier.id).unwrap().unwrap();
    assert_eq!(rated.total_ratings, (threads * per_thread) as u32);
    assert!((rated.rating.unwrap() - 4.0).abs() < 1e-9);
}
