use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{hash_secret, secret_matches};
use crate::engine::assignment::AssignmentEngine;
use crate::engine::shift::ShiftTracker;
use crate::error::AppError;
use crate::geo::{haversine_km, GeoIndex};
use crate::models::driver::{Driver, DriverProfile, GeoPoint};
use crate::models::event::{DispatchEvent, DispatchOutcome, ReassignmentNeeded};
use crate::models::load::{Load, LoadStatus, NewLoad};
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_pickup_distance_km: Option<f64>,
    pub event_buffer_size: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_pickup_distance_km: None,
            event_buffer_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredDriver {
    #[serde(flatten)]
    pub driver: Driver,
    pub access_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShiftEnded {
    #[serde(flatten)]
    pub driver: Driver,
    pub reassignment_needed: Option<ReassignmentNeeded>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverStatusView {
    #[serde(flatten)]
    pub driver: Driver,
    pub active_load: Option<Load>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingLoad {
    pub load_id: Uuid,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetryResult {
    pub load_id: Uuid,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

pub struct DispatchCoordinator {
    drivers: DashMap<Uuid, DriverProfile>,
    geo: GeoIndex,
    shifts: ShiftTracker,
    engine: AssignmentEngine,
    pending: DashMap<Uuid, DateTime<Utc>>,
    reassignments: DashMap<Uuid, ReassignmentNeeded>,
    events_tx: broadcast::Sender<DispatchEvent>,
    metrics: Metrics,
    max_pickup_distance_km: Option<f64>,
}

impl DispatchCoordinator {
    pub fn new(settings: DispatchSettings, metrics: Metrics) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(settings.event_buffer_size.max(1));

        Self {
            drivers: DashMap::new(),
            geo: GeoIndex::new(),
            shifts: ShiftTracker::new(),
            engine: AssignmentEngine::new(),
            pending: DashMap::new(),
            reassignments: DashMap::new(),
            events_tx,
            metrics,
            max_pickup_distance_km: settings.max_pickup_distance_km,
        }
    }

    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    pub fn shifts(&self) -> &ShiftTracker {
        &self.shifts
    }

    pub fn engine(&self) -> &AssignmentEngine {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events_tx.subscribe()
    }

    // Drivers

    pub fn register_driver(&self, name: &str) -> Result<RegisteredDriver, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }

        let access_code = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let profile = DriverProfile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            access_code_hash: hash_secret(&access_code),
            created_at: now,
            updated_at: now,
        };

        self.drivers.insert(profile.id, profile.clone());
        info!(driver_id = %profile.id, "driver registered");

        Ok(RegisteredDriver {
            driver: self.view(&profile),
            access_code,
        })
    }

    pub fn verify_driver_code(&self, driver_id: Uuid, access_code: &str) -> Result<(), AppError> {
        let matches = self
            .drivers
            .get(&driver_id)
            .is_some_and(|profile| secret_matches(access_code, &profile.access_code_hash));

        if matches {
            Ok(())
        } else {
            Err(AppError::Unauthorized("invalid driver credentials".to_string()))
        }
    }

    pub fn driver(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let profile = self.profile(driver_id)?;
        Ok(self.view(&profile))
    }

    pub fn drivers(&self) -> Vec<Driver> {
        let mut profiles: Vec<DriverProfile> = self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        profiles.iter().map(|profile| self.view(profile)).collect()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn driver_status(&self, driver_id: Uuid) -> Result<DriverStatusView, AppError> {
        let driver = self.driver(driver_id)?;
        let active_load = match self.engine.active_load_for(driver_id) {
            Some(load_id) => Some(self.engine.get(load_id)?),
            None => None,
        };

        Ok(DriverStatusView {
            driver,
            active_load,
        })
    }

    pub fn report_location(&self, driver_id: Uuid, point: GeoPoint) -> Result<Driver, AppError> {
        point.validate()?;
        let profile = self.touch(driver_id)?;

        self.geo.update(driver_id, point);
        debug!(driver_id = %driver_id, lat = point.lat, lng = point.lng, "driver location updated");

        Ok(self.view(&profile))
    }

    pub fn start_shift(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        self.profile(driver_id)?;

        self.shifts.start_shift(driver_id)?;
        let profile = self.touch(driver_id)?;
        self.metrics
            .drivers_on_shift
            .set(self.shifts.on_shift_count() as i64);
        self.publish(DispatchEvent::ShiftStarted { driver_id });
        info!(driver_id = %driver_id, "shift started");

        Ok(self.view(&profile))
    }

    pub fn end_shift(&self, driver_id: Uuid) -> Result<ShiftEnded, AppError> {
        self.profile(driver_id)?;

        self.shifts.end_shift(driver_id)?;
        let profile = self.touch(driver_id)?;
        self.metrics
            .drivers_on_shift
            .set(self.shifts.on_shift_count() as i64);
        self.publish(DispatchEvent::ShiftEnded { driver_id });
        info!(driver_id = %driver_id, "shift ended");

        let reassignment_needed = self
            .engine
            .active_load_for(driver_id)
            .and_then(|load_id| self.raise_reassignment(load_id, driver_id));

        Ok(ShiftEnded {
            driver: self.view(&profile),
            reassignment_needed,
        })
    }

    // Loads

    pub fn load(&self, load_id: Uuid) -> Result<Load, AppError> {
        self.engine.get(load_id)
    }

    pub fn loads(&self, status: Option<LoadStatus>) -> Vec<Load> {
        self.engine.list(status)
    }

    pub fn create_load(&self, new_load: NewLoad) -> Result<(Load, DispatchOutcome), AppError> {
        new_load.pickup.validate()?;
        new_load.dropoff.validate()?;

        let load = self.engine.create(new_load);
        self.metrics.record_transition(LoadStatus::AwaitingDriver.as_str());
        self.publish(DispatchEvent::LoadCreated {
            load_id: load.id,
            created_by: load.created_by,
        });
        info!(load_id = %load.id, created_by = %load.created_by, "load created");

        let outcome = self.dispatch_created(load.id)?;
        Ok((self.engine.get(load.id)?, outcome))
    }

    // The load is already stored; a racing admin action must not hide its id.
    fn dispatch_created(&self, load_id: Uuid) -> Result<DispatchOutcome, AppError> {
        match self.dispatch(load_id) {
            Err(AppError::Conflict(reason)) => {
                warn!(load_id = %load_id, %reason, "load changed before dispatch completed");
                Ok(DispatchOutcome::Pending)
            }
            other => other,
        }
    }

    pub fn dispatch(&self, load_id: Uuid) -> Result<DispatchOutcome, AppError> {
        let start = Instant::now();
        let result = self.try_dispatch(load_id);

        let label = match &result {
            Ok(DispatchOutcome::Assigned { .. }) => "assigned",
            Ok(DispatchOutcome::Pending) => "pending",
            Err(_) => "error",
        };
        self.metrics
            .record_dispatch(label, start.elapsed().as_secs_f64());

        result
    }

    pub fn retry_pending(&self) -> Vec<RetryResult> {
        let mut results = Vec::new();

        for pending in self.pending_loads() {
            match self.dispatch(pending.load_id) {
                Ok(outcome) => results.push(RetryResult {
                    load_id: pending.load_id,
                    outcome,
                }),
                Err(err) => {
                    warn!(load_id = %pending.load_id, error = %err, "dropping pending load");
                    self.clear_pending(pending.load_id);
                }
            }
        }

        results
    }

    pub fn pending_loads(&self) -> Vec<PendingLoad> {
        let mut pending: Vec<PendingLoad> = self
            .pending
            .iter()
            .map(|entry| PendingLoad {
                load_id: *entry.key(),
                since: *entry.value(),
            })
            .collect();
        pending.sort_by(|a, b| a.since.cmp(&b.since).then_with(|| a.load_id.cmp(&b.load_id)));
        pending
    }

    pub fn reassignments(&self) -> Vec<ReassignmentNeeded> {
        let mut signals: Vec<ReassignmentNeeded> = self
            .reassignments
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        signals.sort_by(|a, b| a.raised_at.cmp(&b.raised_at).then_with(|| a.load_id.cmp(&b.load_id)));
        signals
    }

    pub fn assign_manually(&self, load_id: Uuid, driver_id: Uuid) -> Result<Load, AppError> {
        self.profile(driver_id)?;

        let load = match self.engine.get(load_id)?.status() {
            LoadStatus::Assigned | LoadStatus::PickedUp => {
                self.engine.reassign(load_id, driver_id, &self.shifts)?
            }
            _ => self.engine.assign(load_id, driver_id, &self.shifts)?,
        };

        self.clear_pending(load_id);
        // A signal raised by the new driver's own shift end must survive.
        self.reassignments
            .remove_if(&load_id, |_, raised| raised.driver_id != driver_id);
        self.metrics.record_transition(load.status().as_str());

        let distance_km = self
            .geo
            .position(driver_id)
            .map(|position| haversine_km(&position, &load.pickup));
        self.publish(DispatchEvent::LoadAssigned {
            load_id,
            driver_id,
            distance_km,
        });
        info!(load_id = %load_id, driver_id = %driver_id, "load assigned manually");

        Ok(load)
    }

    pub fn record_pickup(&self, driver_id: Uuid, load_id: Uuid) -> Result<Load, AppError> {
        let load = self.engine.record_pickup_by(load_id, driver_id)?;

        self.metrics.record_transition(load.status().as_str());
        self.publish(DispatchEvent::LoadPickedUp { load_id, driver_id });
        info!(load_id = %load_id, driver_id = %driver_id, "load picked up");

        Ok(load)
    }

    pub fn record_dropoff(&self, driver_id: Uuid, load_id: Uuid) -> Result<Load, AppError> {
        let load = self.engine.record_dropoff_by(load_id, driver_id)?;

        self.reassignments.remove(&load_id);
        self.metrics.record_transition(load.status().as_str());
        self.publish(DispatchEvent::LoadDelivered { load_id, driver_id });
        info!(load_id = %load_id, driver_id = %driver_id, "load delivered");

        Ok(load)
    }

    pub fn cancel(&self, load_id: Uuid) -> Result<Load, AppError> {
        let load = self.engine.cancel(load_id)?;

        self.clear_pending(load_id);
        self.reassignments.remove(&load_id);
        self.metrics.record_transition(load.status().as_str());
        self.publish(DispatchEvent::LoadCancelled { load_id });
        info!(load_id = %load_id, "load cancelled");

        Ok(load)
    }

    fn try_dispatch(&self, load_id: Uuid) -> Result<DispatchOutcome, AppError> {
        let load = self.engine.get(load_id)?;
        if load.status() != LoadStatus::AwaitingDriver {
            return Err(AppError::Conflict(format!(
                "load {load_id} is {}, not awaiting a driver",
                load.status().as_str()
            )));
        }

        let mut candidates: HashSet<Uuid> = self
            .shifts
            .on_shift_drivers()
            .into_iter()
            .filter(|driver_id| !self.engine.is_busy(*driver_id))
            .collect();

        // Each rejected candidate is removed, so this ends once the set empties.
        loop {
            let nearest = match self.geo.nearest(&load.pickup, &candidates) {
                Ok(nearest) => nearest,
                Err(AppError::NotFound(_)) => return self.mark_pending(load_id),
                Err(err) => return Err(err),
            };

            if let Some(max_km) = self.max_pickup_distance_km {
                if nearest.distance_km > max_km {
                    debug!(
                        load_id = %load_id,
                        driver_id = %nearest.driver_id,
                        distance_km = nearest.distance_km,
                        "nearest driver beyond pickup radius"
                    );
                    return self.mark_pending(load_id);
                }
            }

            match self.engine.assign(load_id, nearest.driver_id, &self.shifts) {
                Ok(assigned) => {
                    self.clear_pending(load_id);
                    self.metrics.record_transition(assigned.status().as_str());
                    self.publish(DispatchEvent::LoadAssigned {
                        load_id,
                        driver_id: nearest.driver_id,
                        distance_km: Some(nearest.distance_km),
                    });
                    info!(
                        load_id = %load_id,
                        driver_id = %nearest.driver_id,
                        distance_km = nearest.distance_km,
                        "load assigned"
                    );
                    return Ok(DispatchOutcome::Assigned {
                        driver_id: nearest.driver_id,
                        distance_km: nearest.distance_km,
                    });
                }
                Err(AppError::InvalidDriver(reason)) => {
                    debug!(load_id = %load_id, driver_id = %nearest.driver_id, %reason, "candidate no longer eligible");
                    candidates.remove(&nearest.driver_id);
                }
                Err(err) => return Err(err),
            }
        }
    }

    // Checked after the insert: a concurrent assignment clears the entry only
    // once the load has left AwaitingDriver.
    fn mark_pending(&self, load_id: Uuid) -> Result<DispatchOutcome, AppError> {
        self.pending.entry(load_id).or_insert_with(Utc::now);

        let status = self.engine.get(load_id)?.status();
        if status != LoadStatus::AwaitingDriver {
            self.clear_pending(load_id);
            return Err(AppError::Conflict(format!(
                "load {load_id} is {}, not awaiting a driver",
                status.as_str()
            )));
        }

        self.metrics.loads_pending.set(self.pending.len() as i64);
        self.publish(DispatchEvent::LoadPending { load_id });
        warn!(load_id = %load_id, "no eligible driver; load left pending");
        Ok(DispatchOutcome::Pending)
    }

    // Same shape as mark_pending: the active binding is dropped before any
    // reassign, dropoff or cancel clears the signal, so re-checking it after
    // the insert leaves no stale entry behind.
    fn raise_reassignment(&self, load_id: Uuid, driver_id: Uuid) -> Option<ReassignmentNeeded> {
        let signal = ReassignmentNeeded {
            load_id,
            driver_id,
            raised_at: Utc::now(),
        };
        self.reassignments.insert(load_id, signal.clone());

        if self.engine.active_load_for(driver_id) != Some(load_id) {
            self.reassignments
                .remove_if(&load_id, |_, raised| raised.driver_id == driver_id);
            debug!(load_id = %load_id, driver_id = %driver_id, "load moved before reassignment was raised");
            return None;
        }

        self.metrics.reassignments_needed_total.inc();
        self.publish(DispatchEvent::ReassignmentNeeded { load_id, driver_id });
        warn!(load_id = %load_id, driver_id = %driver_id, "driver left shift holding an active load");
        Some(signal)
    }

    fn clear_pending(&self, load_id: Uuid) {
        if self.pending.remove(&load_id).is_some() {
            self.metrics.loads_pending.set(self.pending.len() as i64);
        }
    }

    fn profile(&self, driver_id: Uuid) -> Result<DriverProfile, AppError> {
        self.drivers
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))
    }

    fn touch(&self, driver_id: Uuid) -> Result<DriverProfile, AppError> {
        let mut profile = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    fn view(&self, profile: &DriverProfile) -> Driver {
        Driver::from_parts(
            profile,
            self.shifts.state(profile.id),
            self.geo.position(profile.id),
        )
    }

    fn publish(&self, event: DispatchEvent) {
        let _ = self.events_tx.send(event);
    }
}
