/// Version stamped into `PRAGMA user_version` by the store.
pub const SCHEMA_VERSION: i32 = 1;

/// SQLite schema shared by every process that opens the marketplace store.
///
/// Relationship lists (a shipment's bids, a carrier's bids, vehicles and
/// delivered shipments) are not stored. They are read back through the
/// indexes below, so a bid row is the single source of truth for its links.
///
/// `idx_bids_one_accepted` makes a second accepted bid on the same shipment
/// impossible regardless of the caller.
pub const MARKETPLACE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS shippers (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS carriers (
    id             TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL UNIQUE,
    rating         REAL CHECK (rating IS NULL OR (rating >= 1.0 AND rating <= 5.0)),
    total_ratings  INTEGER NOT NULL DEFAULT 0 CHECK (total_ratings >= 0),
    created_at     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS vehicles (
    id                   TEXT PRIMARY KEY,
    carrier_id           TEXT NOT NULL REFERENCES carriers(id),
    registration_number  TEXT NOT NULL,
    created_at           TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS shipments (
    id                       TEXT PRIMARY KEY,
    shipper_id               TEXT NOT NULL REFERENCES shippers(id),
    carrier_id               TEXT REFERENCES carriers(id),
    status                   TEXT NOT NULL CHECK (status IN ('waiting', 'active', 'delayed', 'delivered')),
    modes_json               TEXT NOT NULL,
    pickup_point             TEXT,
    origin_json              TEXT NOT NULL,
    destination_json         TEXT NOT NULL,
    distance                 REAL NOT NULL CHECK (distance > 0),
    cargo_load               REAL NOT NULL CHECK (cargo_load > 0),
    cargo_type               TEXT,
    price                    TEXT,
    current_location         TEXT,
    vehicle_id               TEXT,
    predicted_route          TEXT,
    route_taken              TEXT,
    shipped_at               TEXT,
    estimated_delivery_date  TEXT,
    delivered_at             TEXT,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_shipments_shipper ON shipments(shipper_id, created_at);
CREATE INDEX IF NOT EXISTS idx_shipments_carrier ON shipments(carrier_id, status);
CREATE TABLE IF NOT EXISTS bids (
    id                      TEXT PRIMARY KEY,
    shipment_id             TEXT NOT NULL REFERENCES shipments(id),
    carrier_id              TEXT NOT NULL REFERENCES carriers(id),
    proposed_price          TEXT NOT NULL,
    proposed_vehicle        TEXT NOT NULL REFERENCES vehicles(id),
    proposed_delivery_date  TEXT NOT NULL,
    additional_notes        TEXT NOT NULL DEFAULT '',
    accepted                INTEGER NOT NULL DEFAULT 0 CHECK (accepted IN (0, 1)),
    created_at              TEXT NOT NULL,
    accepted_at             TEXT
);
CREATE INDEX IF NOT EXISTS idx_bids_shipment ON bids(shipment_id, created_at);
CREATE INDEX IF NOT EXISTS idx_bids_carrier ON bids(carrier_id, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bids_one_accepted ON bids(shipment_id) WHERE accepted = 1;
CREATE TABLE IF NOT EXISTS impediments (
    id               TEXT PRIMARY KEY,
    shipment_id      TEXT NOT NULL REFERENCES shipments(id),
    kind             TEXT NOT NULL,
    delay_seconds    INTEGER NOT NULL DEFAULT 0 CHECK (delay_seconds >= 0),
    additional_info  TEXT,
    resolved         INTEGER NOT NULL DEFAULT 0 CHECK (resolved IN (0, 1)),
    occurred_at      TEXT NOT NULL,
    resolved_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_impediments_shipment ON impediments(shipment_id, occurred_at);
";
