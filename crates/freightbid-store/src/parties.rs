//! Shippers, carriers and vehicles.
//!
//! Registration and vehicle CRUD live outside the marketplace core; the
//! inserts here are how those collaborators (and tests) seed the store.

use freightbid_models::party::{Carrier, Shipper, Vehicle, MAX_RATING, MIN_RATING};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::codec::{decode_ts, decode_uuid, encode_ts};
use crate::error::StoreError;
use crate::store::Store;

fn id_list(conn: &Connection, table: &'static str, sql: &str, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter().map(|r| decode_uuid(table, r)).collect()
}

fn id_by_user(conn: &Connection, table: &'static str, user_id: Uuid) -> Result<Option<Uuid>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT id FROM {table} WHERE user_id = ?1"),
            params![user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|r| decode_uuid(table, &r)).transpose()
}

pub(crate) fn load_carrier(conn: &Connection, id: Uuid) -> Result<Option<Carrier>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, rating, total_ratings, created_at FROM carriers WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((raw_id, user_id, rating, total_ratings, created_at)) = row else {
        return Ok(None);
    };

    Ok(Some(Carrier {
        id: decode_uuid("carriers", &raw_id)?,
        user_id: decode_uuid("carriers", &user_id)?,
        vehicles: id_list(
            conn,
            "vehicles",
            "SELECT id FROM vehicles WHERE carrier_id = ?1 ORDER BY created_at, rowid",
            id,
        )?,
        bids: id_list(
            conn,
            "bids",
            "SELECT id FROM bids WHERE carrier_id = ?1 ORDER BY created_at, rowid",
            id,
        )?,
        delivered_shipments: id_list(
            conn,
            "shipments",
            "SELECT id FROM shipments WHERE carrier_id = ?1 AND status = 'delivered' \
             ORDER BY delivered_at, rowid",
            id,
        )?,
        rating,
        total_ratings,
        created_at: decode_ts("carriers", &created_at)?,
    }))
}

pub(crate) fn load_shipper(conn: &Connection, id: Uuid) -> Result<Option<Shipper>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, created_at FROM shippers WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((raw_id, user_id, created_at)) = row else {
        return Ok(None);
    };

    Ok(Some(Shipper {
        id: decode_uuid("shippers", &raw_id)?,
        user_id: decode_uuid("shippers", &user_id)?,
        sent_shipments: id_list(
            conn,
            "shipments",
            "SELECT id FROM shipments WHERE shipper_id = ?1 ORDER BY created_at, rowid",
            id,
        )?,
        created_at: decode_ts("shippers", &created_at)?,
    }))
}

impl Store {
    pub fn insert_shipper(&self, shipper: &Shipper) -> Result<Shipper, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO shippers (id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![
                    shipper.id.to_string(),
                    shipper.user_id.to_string(),
                    encode_ts(&shipper.created_at),
                ],
            )?;
            load_shipper(conn, shipper.id)?
                .ok_or_else(|| StoreError::corrupt("shippers", "row vanished after insert"))
        })
    }

    pub fn find_shipper(&self, id: Uuid) -> Result<Option<Shipper>, StoreError> {
        self.with_conn(|conn| load_shipper(conn, id))
    }

    pub fn find_shipper_by_user(&self, user_id: Uuid) -> Result<Option<Shipper>, StoreError> {
        self.with_conn(|conn| match id_by_user(conn, "shippers", user_id)? {
            Some(id) => load_shipper(conn, id),
            None => Ok(None),
        })
    }

    pub fn insert_carrier(&self, carrier: &Carrier) -> Result<Carrier, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO carriers (id, user_id, rating, total_ratings, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    carrier.id.to_string(),
                    carrier.user_id.to_string(),
                    carrier.rating,
                    carrier.total_ratings,
                    encode_ts(&carrier.created_at),
                ],
            )?;
            load_carrier(conn, carrier.id)?
                .ok_or_else(|| StoreError::corrupt("carriers", "row vanished after insert"))
        })
    }

    pub fn find_carrier(&self, id: Uuid) -> Result<Option<Carrier>, StoreError> {
        self.with_conn(|conn| load_carrier(conn, id))
    }

    pub fn find_carrier_by_user(&self, user_id: Uuid) -> Result<Option<Carrier>, StoreError> {
        self.with_conn(|conn| match id_by_user(conn, "carriers", user_id)? {
            Some(id) => load_carrier(conn, id),
            None => Ok(None),
        })
    }

    /// Fold one rating into the carrier's running mean in a single statement,
    /// so concurrent raters never lose an update. Returns `None` when the
    /// carrier does not exist.
    ///
    /// Unrated carriers take the new rating as-is with a count of one;
    /// otherwise `rating' = (rating * total + new) / (total + 1)`.
    pub fn apply_rating(&self, id: Uuid, rating: f64) -> Result<Option<Carrier>, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE carriers SET \
                     rating = CASE WHEN rating IS NULL THEN ?2 \
                         ELSE MIN(?4, MAX(?3, (rating * total_ratings + ?2) / (total_ratings + 1))) END, \
                     total_ratings = CASE WHEN rating IS NULL THEN 1 ELSE total_ratings + 1 END \
                 WHERE id = ?1",
                params![id.to_string(), rating, MIN_RATING, MAX_RATING],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            load_carrier(conn, id)
        })
    }

    pub fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vehicles (id, carrier_id, registration_number, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    vehicle.id.to_string(),
                    vehicle.carrier_id.to_string(),
                    vehicle.registration_number,
                    encode_ts(&vehicle.created_at),
                ],
            )?;
            Ok(())
        })?;
        self.find_vehicle(vehicle.id)?
            .ok_or_else(|| StoreError::corrupt("vehicles", "row vanished after insert"))
    }

    pub fn find_vehicle(&self, id: Uuid) -> Result<Option<Vehicle>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, carrier_id, registration_number, created_at FROM vehicles WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(raw_id, carrier_id, registration_number, created_at)| {
                Ok(Vehicle {
                    id: decode_uuid("vehicles", &raw_id)?,
                    carrier_id: decode_uuid("vehicles", &carrier_id)?,
                    registration_number,
                    created_at: decode_ts("vehicles", &created_at)?,
                })
            })
            .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_carrier(store: &Store) -> Carrier {
        store.insert_carrier(&Carrier::new(Uuid::new_v4())).unwrap()
    }

    #[test]
    fn insert_and_find_carrier() {
        let store = Store::open_in_memory().unwrap();
        let carrier = seeded_carrier(&store);
        let found = store.find_carrier(carrier.id).unwrap().unwrap();
        assert_eq!(found, carrier);
        assert!(store.find_carrier(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn carrier_vehicles_are_derived() {
        let store = Store::open_in_memory().unwrap();
        let carrier = seeded_carrier(&store);
        let v1 = store.insert_vehicle(&Vehicle::new(carrier.id, "KA-01-1234")).unwrap();
        let v2 = store.insert_vehicle(&Vehicle::new(carrier.id, "KA-01-5678")).unwrap();

        let found = store.find_carrier(carrier.id).unwrap().unwrap();
        assert_eq!(found.vehicles, vec![v1.id, v2.id]);
    }

    #[test]
    fn running_mean_rating() {
        let store = Store::open_in_memory().unwrap();
        let carrier = seeded_carrier(&store);

        let after_first = store.apply_rating(carrier.id, 4.0).unwrap().unwrap();
        assert_eq!(after_first.rating, Some(4.0));
        assert_eq!(after_first.total_ratings, 1);

        let after_second = store.apply_rating(carrier.id, 5.0).unwrap().unwrap();
        assert_eq!(after_second.rating, Some(4.5));

        let after_third = store.apply_rating(carrier.id, 3.0).unwrap().unwrap();
        assert_eq!(after_third.rating, Some(4.0));
        assert_eq!(after_third.total_ratings, 3);
    }

    #[test]
    fn rating_unknown_carrier() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.apply_rating(Uuid::new_v4(), 3.0).unwrap().is_none());
    }

    #[test]
    fn lookup_by_user() {
        let store = Store::open_in_memory().unwrap();
        let carrier = seeded_carrier(&store);
        let shipper = store.insert_shipper(&Shipper::new(Uuid::new_v4())).unwrap();

        assert_eq!(store.find_carrier_by_user(carrier.user_id).unwrap(), Some(carrier));
        assert_eq!(store.find_shipper_by_user(shipper.user_id).unwrap(), Some(shipper.clone()));
        assert!(store.find_carrier_by_user(shipper.user_id).unwrap().is_none());
    }

    #[test]
    fn duplicate_user_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        store.insert_shipper(&Shipper::new(user)).unwrap();
        let err = store.insert_shipper(&Shipper::new(user)).unwrap_err();
        assert!(err.is_constraint_violation());
    }
}
