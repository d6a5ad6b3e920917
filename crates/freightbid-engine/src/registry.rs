use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use freightbid_models::config::PaginationConfig;
use freightbid_models::envelope::{Page, PageLinks};
use freightbid_models::shipment::*;
use freightbid_store::{truncate_to_storage, Guarded, ImpedimentResolution, Store};
use tracing::{debug, info};
use uuid::Uuid;

use crate::distance::{measure, DistanceEstimator};
use crate::error::EngineError;

/// Owns shipment records and the status state machine.
pub struct ShipmentRegistry {
    store: Arc<Store>,
    distance: Arc<dyn DistanceEstimator>,
    distance_timeout: Duration,
    pagination: PaginationConfig,
}

fn require_place(place: Option<Place>, field: &str) -> Result<Place, EngineError> {
    let place = place
        .map(|p| p.normalized())
        .ok_or_else(|| EngineError::Validation(format!("{field} is required")))?;
    if !place.is_complete() {
        return Err(EngineError::Validation(format!(
            "{field} needs a postal code and a country"
        )));
    }
    Ok(place)
}

fn require_positive(value: f64, field: &str) -> Result<f64, EngineError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(EngineError::Validation(format!("{field} must be positive, got {value}")))
    }
}

fn check_schedule(
    shipped_at: Option<DateTime<Utc>>,
    estimated: Option<DateTime<Utc>>,
) -> Result<(), EngineError> {
    match (shipped_at, estimated) {
        (Some(shipped), Some(eta)) if eta < shipped => Err(EngineError::Validation(
            "estimated_delivery_date is before shipped_at".to_string(),
        )),
        _ => Ok(()),
    }
}

impl ShipmentRegistry {
    pub fn new(
        store: Arc<Store>,
        distance: Arc<dyn DistanceEstimator>,
        distance_timeout: Duration,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            store,
            distance,
            distance_timeout,
            pagination,
        }
    }

    /// Post a new shipment for `shipper_id`. Nothing is written unless the
    /// distance between origin and destination resolves to a positive value.
    pub async fn create(
        &self,
        shipper_id: Uuid,
        draft: ShipmentDraft,
    ) -> Result<Shipment, EngineError> {
        let origin = require_place(draft.origin, "origin")?;
        let destination = require_place(draft.destination, "destination")?;
        let cargo_load = require_positive(
            draft
                .cargo_load
                .ok_or_else(|| EngineError::Validation("cargo_load is required".to_string()))?,
            "cargo_load",
        )?;
        check_schedule(draft.shipped_at, draft.estimated_delivery_date)?;

        if self.store.find_shipper(shipper_id)?.is_none() {
            return Err(EngineError::not_found("shipper", shipper_id));
        }

        let distance = measure(
            self.distance.as_ref(),
            &origin,
            &destination,
            self.distance_timeout,
        )
        .await?;
        let distance = require_positive(distance, "distance")
            .map_err(|_| EngineError::InvalidLocation(format!("{origin} -> {destination}")))?;

        let now = truncate_to_storage(Utc::now());
        let shipment = Shipment {
            id: Uuid::new_v4(),
            shipper_id,
            carrier_id: None,
            status: ShipmentStatus::Waiting,
            modes: draft.modes,
            pickup_point: draft.pickup_point,
            origin,
            destination,
            distance,
            cargo_load,
            cargo_type: draft.cargo_type,
            price: None,
            current_location: None,
            vehicle_id: None,
            bids: Vec::new(),
            impediments: Vec::new(),
            predicted_route: None,
            route_taken: None,
            shipped_at: draft.shipped_at,
            estimated_delivery_date: draft.estimated_delivery_date,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.insert_shipment(&shipment)?;
        info!(
            shipment_id = %stored.id,
            shipper_id = %shipper_id,
            distance_km = stored.distance,
            "Shipment created"
        );
        Ok(stored)
    }

    pub fn get(&self, id: Uuid) -> Result<Shipment, EngineError> {
        self.store
            .find_shipment(id)?
            .ok_or_else(|| EngineError::not_found("shipment", id))
    }

    /// Edit a shipment that is still `waiting`. Moving either endpoint
    /// recomputes the distance.
    pub async fn update(&self, id: Uuid, patch: ShipmentPatch) -> Result<Shipment, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("update has no fields".to_string()));
        }
        let current = self.get(id)?;
        if current.status != ShipmentStatus::Waiting {
            return Err(EngineError::Conflict(format!(
                "shipment {id} is {} and can no longer be edited",
                current.status
            )));
        }

        let mut next = current.clone();
        let moves_endpoints = patch.moves_endpoints();
        if let Some(origin) = patch.origin {
            next.origin = require_place(Some(origin), "origin")?;
        }
        if let Some(destination) = patch.destination {
            next.destination = require_place(Some(destination), "destination")?;
        }
        if let Some(cargo_load) = patch.cargo_load {
            next.cargo_load = require_positive(cargo_load, "cargo_load")?;
        }
        if let Some(modes) = patch.modes {
            next.modes = modes;
        }
        if patch.cargo_type.is_some() {
            next.cargo_type = patch.cargo_type;
        }
        if patch.pickup_point.is_some() {
            next.pickup_point = patch.pickup_point;
        }
        if patch.shipped_at.is_some() {
            next.shipped_at = patch.shipped_at;
        }
        if patch.estimated_delivery_date.is_some() {
            next.estimated_delivery_date = patch.estimated_delivery_date;
        }
        check_schedule(next.shipped_at, next.estimated_delivery_date)?;

        if moves_endpoints {
            let km = measure(
                self.distance.as_ref(),
                &next.origin,
                &next.destination,
                self.distance_timeout,
            )
            .await?;
            next.distance = require_positive(km, "distance").map_err(|_| {
                EngineError::InvalidLocation(format!("{} -> {}", next.origin, next.destination))
            })?;
        }
        next.updated_at = truncate_to_storage(Utc::now());

        match self.store.update_waiting_shipment(&next)? {
            Guarded::Applied(stored) => {
                debug!(shipment_id = %id, "Shipment updated");
                Ok(stored)
            }
            Guarded::Missing => Err(EngineError::not_found("shipment", id)),
            Guarded::Blocked(status) => Err(EngineError::Conflict(format!(
                "shipment {id} became {status} during the update"
            ))),
        }
    }

    /// Apply one edge of the state machine.
    pub fn transition(&self, id: Uuid, event: ShipmentEvent) -> Result<Shipment, EngineError> {
        let current = self.get(id)?;
        let target = current
            .status
            .apply(event)
            .ok_or(EngineError::InvalidTransition {
                from: current.status,
                event,
            })?;

        match self
            .store
            .transition_shipment(id, current.status, target, Utc::now())?
        {
            Guarded::Applied(shipment) => {
                info!(shipment_id = %id, from = %current.status, to = %target, "Shipment transitioned");
                Ok(shipment)
            }
            Guarded::Missing => Err(EngineError::not_found("shipment", id)),
            Guarded::Blocked(now) => Err(EngineError::Conflict(format!(
                "shipment {id} moved from {} to {now} concurrently",
                current.status
            ))),
        }
    }

    /// One page of a shipper's shipments, newest first.
    pub fn list_by_shipper(
        &self,
        shipper_id: Uuid,
        page: u32,
        per_page: u32,
        status: Option<ShipmentStatus>,
    ) -> Result<Page<Shipment>, EngineError> {
        if page < 1 {
            return Err(EngineError::Validation(format!("page must be >= 1, got {page}")));
        }
        if per_page < 1 || per_page > self.pagination.max_per_page {
            return Err(EngineError::Validation(format!(
                "per_page must be within [1, {}], got {per_page}",
                self.pagination.max_per_page
            )));
        }

        let total = self.store.count_shipments_by_shipper(shipper_id, status)?;
        let offset = u64::from(page - 1) * u64::from(per_page);
        let items = self
            .store
            .list_shipments_by_shipper(shipper_id, status, per_page, offset)?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
            links: PageLinks::compute(total, page, per_page),
        })
    }

    pub fn default_per_page(&self) -> u32 {
        self.pagination.default_per_page
    }

    /// Record a delay-causing event on a shipment in transit.
    pub fn report_impediment(
        &self,
        shipment_id: Uuid,
        report: ImpedimentReport,
    ) -> Result<ImpedimentUpdate, EngineError> {
        if i64::try_from(report.delay_seconds).is_err() {
            return Err(EngineError::Validation(format!(
                "delay_seconds must be at most {}, got {}",
                i64::MAX,
                report.delay_seconds
            )));
        }
        let impediment = Impediment {
            id: Uuid::new_v4(),
            shipment_id,
            kind: report.kind,
            delay_seconds: report.delay_seconds,
            additional_info: report.additional_info,
            resolved: false,
            occurred_at: Utc::now(),
            resolved_at: None,
        };

        match self.store.record_impediment(&impediment)? {
            Guarded::Applied(update) => {
                info!(
                    shipment_id = %shipment_id,
                    kind = impediment.kind.as_str(),
                    delay_seconds = impediment.delay_seconds,
                    "Impediment reported"
                );
                Ok(update)
            }
            Guarded::Missing => Err(EngineError::not_found("shipment", shipment_id)),
            Guarded::Blocked(status) => Err(EngineError::Conflict(format!(
                "impediments can only be reported in transit, shipment {shipment_id} is {status}"
            ))),
        }
    }

    pub fn find_impediment(&self, id: Uuid) -> Result<Impediment, EngineError> {
        self.store
            .find_impediment(id)?
            .ok_or_else(|| EngineError::not_found("impediment", id))
    }

    /// Resolve an impediment; the shipment resumes once none remain open.
    pub fn resolve_impediment(&self, id: Uuid) -> Result<ImpedimentUpdate, EngineError> {
        match self.store.resolve_impediment(id, Utc::now())? {
            ImpedimentResolution::Resolved(update) => {
                info!(
                    impediment_id = %id,
                    shipment_id = %update.shipment.id,
                    status = %update.shipment.status,
                    "Impediment resolved"
                );
                Ok(update)
            }
            ImpedimentResolution::Missing => Err(EngineError::not_found("impediment", id)),
            ImpedimentResolution::AlreadyResolved => Err(EngineError::Conflict(format!(
                "impediment {id} is already resolved"
            ))),
            ImpedimentResolution::Blocked(status) => Err(EngineError::Conflict(format!(
                "shipment is {status}, impediment {id} can no longer change"
            ))),
        }
    }
}
