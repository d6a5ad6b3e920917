use chrono::{DateTime, Utc};
use freightbid_models::shipment::{
    Impediment, ImpedimentUpdate, Place, Shipment, ShipmentStatus, TransportMode,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::codec::*;
use crate::error::StoreError;
use crate::store::Store;

const TABLE: &str = "shipments";

pub(crate) const SHIPMENT_COLUMNS: &str = "id, shipper_id, carrier_id, status, modes_json, \
    pickup_point, origin_json, destination_json, distance, cargo_load, cargo_type, price, \
    current_location, vehicle_id, predicted_route, route_taken, shipped_at, \
    estimated_delivery_date, delivered_at, created_at, updated_at";

/// Result of a write guarded on the shipment's current status.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    Applied(T),
    Missing,
    /// The guard did not hold. Carries the status observed at write time.
    Blocked(ShipmentStatus),
}

/// A shipment row as stored, before decoding.
struct ShipmentRow {
    id: String,
    shipper_id: String,
    carrier_id: Option<String>,
    status: String,
    modes_json: String,
    pickup_point: Option<String>,
    origin_json: String,
    destination_json: String,
    distance: f64,
    cargo_load: f64,
    cargo_type: Option<String>,
    price: Option<String>,
    current_location: Option<String>,
    vehicle_id: Option<String>,
    predicted_route: Option<String>,
    route_taken: Option<String>,
    shipped_at: Option<String>,
    estimated_delivery_date: Option<String>,
    delivered_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<ShipmentRow> {
    Ok(ShipmentRow {
        id: row.get(0)?,
        shipper_id: row.get(1)?,
        carrier_id: row.get(2)?,
        status: row.get(3)?,
        modes_json: row.get(4)?,
        pickup_point: row.get(5)?,
        origin_json: row.get(6)?,
        destination_json: row.get(7)?,
        distance: row.get(8)?,
        cargo_load: row.get(9)?,
        cargo_type: row.get(10)?,
        price: row.get(11)?,
        current_location: row.get(12)?,
        vehicle_id: row.get(13)?,
        predicted_route: row.get(14)?,
        route_taken: row.get(15)?,
        shipped_at: row.get(16)?,
        estimated_delivery_date: row.get(17)?,
        delivered_at: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

impl ShipmentRow {
    fn decode(self, conn: &Connection) -> Result<Shipment, StoreError> {
        let id = decode_uuid(TABLE, &self.id)?;
        let modes: Vec<TransportMode> = serde_json::from_str(&self.modes_json)?;
        let origin: Place = serde_json::from_str(&self.origin_json)?;
        let destination: Place = serde_json::from_str(&self.destination_json)?;

        Ok(Shipment {
            id,
            shipper_id: decode_uuid(TABLE, &self.shipper_id)?,
            carrier_id: decode_opt_uuid(TABLE, self.carrier_id)?,
            status: decode_enum(TABLE, &self.status)?,
            modes,
            pickup_point: self.pickup_point,
            origin,
            destination,
            distance: self.distance,
            cargo_load: self.cargo_load,
            cargo_type: self.cargo_type,
            price: decode_opt_decimal(TABLE, self.price)?,
            current_location: decode_opt_uuid(TABLE, self.current_location)?,
            vehicle_id: decode_opt_uuid(TABLE, self.vehicle_id)?,
            bids: linked_ids(
                conn,
                "SELECT id FROM bids WHERE shipment_id = ?1 ORDER BY created_at, rowid",
                id,
            )?,
            impediments: linked_ids(
                conn,
                "SELECT id FROM impediments WHERE shipment_id = ?1 ORDER BY occurred_at, rowid",
                id,
            )?,
            predicted_route: decode_opt_uuid(TABLE, self.predicted_route)?,
            route_taken: decode_opt_uuid(TABLE, self.route_taken)?,
            shipped_at: decode_opt_ts(TABLE, self.shipped_at)?,
            estimated_delivery_date: decode_opt_ts(TABLE, self.estimated_delivery_date)?,
            delivered_at: decode_opt_ts(TABLE, self.delivered_at)?,
            created_at: decode_ts(TABLE, &self.created_at)?,
            updated_at: decode_ts(TABLE, &self.updated_at)?,
        })
    }
}

fn linked_ids(conn: &Connection, sql: &str, id: Uuid) -> Result<Vec<Uuid>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raw = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter().map(|r| decode_uuid(TABLE, r)).collect()
}

pub(crate) fn load_shipment(conn: &Connection, id: Uuid) -> Result<Option<Shipment>, StoreError> {
    let sql = format!("SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], read_row)
        .optional()?;
    row.map(|r| r.decode(conn)).transpose()
}

/// Load a shipment that must exist because another row references it.
pub(crate) fn load_linked_shipment(conn: &Connection, id: Uuid) -> Result<Shipment, StoreError> {
    load_shipment(conn, id)?
        .ok_or_else(|| StoreError::corrupt(TABLE, format!("dangling reference to shipment {id}")))
}

pub(crate) fn current_status(
    conn: &Connection,
    id: Uuid,
) -> Result<Option<ShipmentStatus>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM shipments WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| decode_enum(TABLE, &s)).transpose()
}

pub(crate) fn set_status(
    conn: &Connection,
    id: Uuid,
    from: ShipmentStatus,
    to: ShipmentStatus,
    at: &DateTime<Utc>,
) -> Result<bool, StoreError> {
    let delivered_at = (to == ShipmentStatus::Delivered).then(|| encode_ts(at));
    let changed = conn.execute(
        "UPDATE shipments SET status = ?3, updated_at = ?4, \
             delivered_at = COALESCE(?5, delivered_at) \
         WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            from.as_str(),
            to.as_str(),
            encode_ts(at),
            delivered_at,
        ],
    )?;
    Ok(changed == 1)
}

fn guard_miss<T>(conn: &Connection, id: Uuid) -> Result<Guarded<T>, StoreError> {
    Ok(match current_status(conn, id)? {
        Some(status) => Guarded::Blocked(status),
        None => Guarded::Missing,
    })
}

impl Store {
    /// Persist a new shipment and return it as stored.
    pub fn insert_shipment(&self, shipment: &Shipment) -> Result<Shipment, StoreError> {
        self.with_tx(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO shipments ({SHIPMENT_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                      ?17, ?18, ?19, ?20, ?21)"
                ),
                params![
                    shipment.id.to_string(),
                    shipment.shipper_id.to_string(),
                    encode_opt_uuid(&shipment.carrier_id),
                    shipment.status.as_str(),
                    serde_json::to_string(&shipment.modes)?,
                    shipment.pickup_point,
                    serde_json::to_string(&shipment.origin)?,
                    serde_json::to_string(&shipment.destination)?,
                    shipment.distance,
                    shipment.cargo_load,
                    shipment.cargo_type,
                    shipment.price.map(|p| p.to_string()),
                    encode_opt_uuid(&shipment.current_location),
                    encode_opt_uuid(&shipment.vehicle_id),
                    encode_opt_uuid(&shipment.predicted_route),
                    encode_opt_uuid(&shipment.route_taken),
                    encode_opt_ts(&shipment.shipped_at),
                    encode_opt_ts(&shipment.estimated_delivery_date),
                    encode_opt_ts(&shipment.delivered_at),
                    encode_ts(&shipment.created_at),
                    encode_ts(&shipment.updated_at),
                ],
            )?;
            load_linked_shipment(conn, shipment.id)
        })
    }

    pub fn find_shipment(&self, id: Uuid) -> Result<Option<Shipment>, StoreError> {
        self.with_conn(|conn| load_shipment(conn, id))
    }

    /// Overwrite the editable fields of a shipment, only while it is still
    /// `waiting`. Nothing is written when the guard fails.
    pub fn update_waiting_shipment(
        &self,
        shipment: &Shipment,
    ) -> Result<Guarded<Shipment>, StoreError> {
        self.with_tx(|conn| {
            let changed = conn.execute(
                "UPDATE shipments SET modes_json = ?2, pickup_point = ?3, origin_json = ?4, \
                     destination_json = ?5, distance = ?6, cargo_load = ?7, cargo_type = ?8, \
                     shipped_at = ?9, estimated_delivery_date = ?10, updated_at = ?11 \
                 WHERE id = ?1 AND status = 'waiting'",
                params![
                    shipment.id.to_string(),
                    serde_json::to_string(&shipment.modes)?,
                    shipment.pickup_point,
                    serde_json::to_string(&shipment.origin)?,
                    serde_json::to_string(&shipment.destination)?,
                    shipment.distance,
                    shipment.cargo_load,
                    shipment.cargo_type,
                    encode_opt_ts(&shipment.shipped_at),
                    encode_opt_ts(&shipment.estimated_delivery_date),
                    encode_ts(&shipment.updated_at),
                ],
            )?;
            if changed == 0 {
                return guard_miss(conn, shipment.id);
            }
            Ok(Guarded::Applied(load_linked_shipment(conn, shipment.id)?))
        })
    }

    /// Move a shipment from `from` to `to`, only if it is still in `from`.
    /// Entering `delivered` stamps `delivered_at`.
    pub fn transition_shipment(
        &self,
        id: Uuid,
        from: ShipmentStatus,
        to: ShipmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Guarded<Shipment>, StoreError> {
        self.with_tx(|conn| {
            if !set_status(conn, id, from, to, &at)? {
                return guard_miss(conn, id);
            }
            Ok(Guarded::Applied(load_linked_shipment(conn, id)?))
        })
    }

    /// One page of a shipper's shipments, newest first.
    pub fn list_shipments_by_shipper(
        &self,
        shipper_id: Uuid,
        status: Option<ShipmentStatus>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Shipment>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SHIPMENT_COLUMNS} FROM shipments \
                 WHERE shipper_id = ?1 AND (?2 IS NULL OR status = ?2) \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        shipper_id.to_string(),
                        status.map(|s| s.as_str()),
                        limit,
                        offset as i64,
                    ],
                    read_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(|r| r.decode(conn)).collect()
        })
    }

    pub fn count_shipments_by_shipper(
        &self,
        shipper_id: Uuid,
        status: Option<ShipmentStatus>,
    ) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM shipments WHERE shipper_id = ?1 AND (?2 IS NULL OR status = ?2)",
                params![shipper_id.to_string(), status.map(|s| s.as_str())],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Record an impediment on an `active` or `delayed` shipment and move an
    /// `active` shipment to `delayed`.
    pub fn record_impediment(
        &self,
        impediment: &Impediment,
    ) -> Result<Guarded<ImpedimentUpdate>, StoreError> {
        let delay_seconds = i64::try_from(impediment.delay_seconds).map_err(|_| {
            StoreError::corrupt(
                "impediments",
                format!("delay_seconds {} does not fit the column", impediment.delay_seconds),
            )
        })?;
        self.with_tx(|conn| {
            let status = match current_status(conn, impediment.shipment_id)? {
                None => return Ok(Guarded::Missing),
                Some(s @ (ShipmentStatus::Waiting | ShipmentStatus::Delivered)) => {
                    return Ok(Guarded::Blocked(s))
                }
                Some(s) => s,
            };

            conn.execute(
                "INSERT INTO impediments \
                 (id, shipment_id, kind, delay_seconds, additional_info, resolved, occurred_at, resolved_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    impediment.id.to_string(),
                    impediment.shipment_id.to_string(),
                    impediment.kind.as_str(),
                    delay_seconds,
                    impediment.additional_info,
                    impediment.resolved,
                    encode_ts(&impediment.occurred_at),
                    encode_opt_ts(&impediment.resolved_at),
                ],
            )?;

            if status == ShipmentStatus::Active {
                set_status(
                    conn,
                    impediment.shipment_id,
                    ShipmentStatus::Active,
                    ShipmentStatus::Delayed,
                    &impediment.occurred_at,
                )?;
            }

            Ok(Guarded::Applied(ImpedimentUpdate {
                shipment: load_linked_shipment(conn, impediment.shipment_id)?,
                impediment: load_impediment(conn, impediment.id)?.ok_or_else(|| {
                    StoreError::corrupt("impediments", "row vanished after insert")
                })?,
            }))
        })
    }

    /// Mark an impediment resolved. A `delayed` shipment with no remaining
    /// open impediments goes back to `active`.
    pub fn resolve_impediment(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ImpedimentResolution, StoreError> {
        self.with_tx(|conn| {
            let Some(impediment) = load_impediment(conn, id)? else {
                return Ok(ImpedimentResolution::Missing);
            };
            if impediment.resolved {
                return Ok(ImpedimentResolution::AlreadyResolved);
            }
            let status = current_status(conn, impediment.shipment_id)?.ok_or_else(|| {
                StoreError::corrupt("impediments", format!("impediment {id} has no shipment"))
            })?;
            if status.is_terminal() {
                return Ok(ImpedimentResolution::Blocked(status));
            }

            conn.execute(
                "UPDATE impediments SET resolved = 1, resolved_at = ?2 WHERE id = ?1",
                params![id.to_string(), encode_ts(&at)],
            )?;

            let open: i64 = conn.query_row(
                "SELECT COUNT(*) FROM impediments WHERE shipment_id = ?1 AND resolved = 0",
                params![impediment.shipment_id.to_string()],
                |row| row.get(0),
            )?;
            if open == 0 && status == ShipmentStatus::Delayed {
                set_status(
                    conn,
                    impediment.shipment_id,
                    ShipmentStatus::Delayed,
                    ShipmentStatus::Active,
                    &at,
                )?;
            }

            Ok(ImpedimentResolution::Resolved(ImpedimentUpdate {
                shipment: load_linked_shipment(conn, impediment.shipment_id)?,
                impediment: load_impediment(conn, id)?.ok_or_else(|| {
                    StoreError::corrupt("impediments", "row vanished after update")
                })?,
            }))
        })
    }

    pub fn find_impediment(&self, id: Uuid) -> Result<Option<Impediment>, StoreError> {
        self.with_conn(|conn| load_impediment(conn, id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImpedimentResolution {
    Resolved(ImpedimentUpdate),
    Missing,
    AlreadyResolved,
    Blocked(ShipmentStatus),
}

fn load_impediment(conn: &Connection, id: Uuid) -> Result<Option<Impediment>, StoreError> {
    const TABLE: &str = "impediments";
    let row = conn
        .query_row(
            "SELECT id, shipment_id, kind, delay_seconds, additional_info, resolved, occurred_at, resolved_at \
             FROM impediments WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((raw_id, shipment_id, kind, delay, info, resolved, occurred_at, resolved_at)) = row
    else {
        return Ok(None);
    };

    Ok(Some(Impediment {
        id: decode_uuid(TABLE, &raw_id)?,
        shipment_id: decode_uuid(TABLE, &shipment_id)?,
        kind: decode_enum(TABLE, &kind)?,
        delay_seconds: u64::try_from(delay)
            .map_err(|_| StoreError::corrupt(TABLE, format!("negative delay {delay}")))?,
        additional_info: info,
        resolved,
        occurred_at: decode_ts(TABLE, &occurred_at)?,
        resolved_at: decode_opt_ts(TABLE, resolved_at)?,
    }))
}
