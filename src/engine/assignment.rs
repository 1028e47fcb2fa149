use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::shift::ShiftTracker;
use crate::error::AppError;
use crate::models::load::{Load, LoadState, LoadStatus, NewLoad};

/// Owns every load and the driver -> active load binding.
///
/// Each transition runs under the load's map entry. When a transition also
/// touches a driver, locks are taken in a fixed order: load entry, then the
/// driver's shift entry, then the driver's active-load entry.
#[derive(Default)]
pub struct AssignmentEngine {
    loads: DashMap<Uuid, Load>,
    active_by_driver: DashMap<Uuid, Uuid>,
}

impl AssignmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, new_load: NewLoad) -> Load {
        let load = Load::new(new_load);
        self.loads.insert(load.id, load.clone());
        debug!(load_id = %load.id, "load created");
        load
    }

    pub fn get(&self, load_id: Uuid) -> Result<Load, AppError> {
        self.loads
            .get(&load_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(load_id))
    }

    pub fn list(&self, status: Option<LoadStatus>) -> Vec<Load> {
        let mut loads: Vec<Load> = self
            .loads
            .iter()
            .filter(|entry| status.is_none_or(|status| entry.value().status() == status))
            .map(|entry| entry.value().clone())
            .collect();

        loads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        loads
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn active_load_for(&self, driver_id: Uuid) -> Option<Uuid> {
        self.active_by_driver
            .get(&driver_id)
            .map(|entry| *entry.value())
    }

    pub fn is_busy(&self, driver_id: Uuid) -> bool {
        self.active_by_driver.contains_key(&driver_id)
    }

    pub fn assign(
        &self,
        load_id: Uuid,
        driver_id: Uuid,
        shifts: &ShiftTracker,
    ) -> Result<Load, AppError> {
        let mut load = self.load_mut(load_id)?;

        if load.state != LoadState::AwaitingDriver {
            return Err(conflict(&load, "assign"));
        }

        shifts.while_on_shift(driver_id, || self.bind_driver(driver_id, load_id))?;

        load.state = LoadState::Assigned { driver_id };
        Ok(finish(&mut load))
    }

    pub fn reassign(
        &self,
        load_id: Uuid,
        driver_id: Uuid,
        shifts: &ShiftTracker,
    ) -> Result<Load, AppError> {
        let mut load = self.load_mut(load_id)?;

        let (previous, picked_up_at) = match load.state {
            LoadState::Assigned { driver_id: current } => (current, None),
            LoadState::PickedUp {
                driver_id: current,
                picked_up_at,
            } => (current, Some(picked_up_at)),
            _ => return Err(conflict(&load, "reassign")),
        };

        if previous == driver_id {
            return Err(AppError::InvalidDriver(format!(
                "load {load_id} is already assigned to driver {driver_id}"
            )));
        }

        shifts.while_on_shift(driver_id, || self.bind_driver(driver_id, load_id))?;
        self.release_driver(previous, load_id);

        load.state = match picked_up_at {
            None => LoadState::Assigned { driver_id },
            Some(picked_up_at) => LoadState::PickedUp {
                driver_id,
                picked_up_at,
            },
        };

        info!(load_id = %load_id, from = %previous, to = %driver_id, "load reassigned");
        Ok(finish(&mut load))
    }

    pub fn record_pickup(&self, load_id: Uuid) -> Result<Load, AppError> {
        self.pickup(load_id, None)
    }

    pub fn record_pickup_by(&self, load_id: Uuid, driver_id: Uuid) -> Result<Load, AppError> {
        self.pickup(load_id, Some(driver_id))
    }

    pub fn record_dropoff(&self, load_id: Uuid) -> Result<Load, AppError> {
        self.dropoff(load_id, None)
    }

    pub fn record_dropoff_by(&self, load_id: Uuid, driver_id: Uuid) -> Result<Load, AppError> {
        self.dropoff(load_id, Some(driver_id))
    }

    pub fn cancel(&self, load_id: Uuid) -> Result<Load, AppError> {
        let mut load = self.load_mut(load_id)?;

        if load.status().is_terminal() {
            return Err(conflict(&load, "cancel"));
        }

        if let Some(driver_id) = load.state.driver_id() {
            self.release_driver(driver_id, load_id);
        }

        let picked_up_at = load.state.picked_up_at();
        load.state = LoadState::Cancelled { picked_up_at };
        Ok(finish(&mut load))
    }

    fn pickup(&self, load_id: Uuid, actor: Option<Uuid>) -> Result<Load, AppError> {
        let mut load = self.load_mut(load_id)?;

        let LoadState::Assigned { driver_id } = load.state else {
            return Err(conflict(&load, "record pickup for"));
        };
        check_actor(load_id, driver_id, actor)?;

        load.state = LoadState::PickedUp {
            driver_id,
            picked_up_at: Utc::now(),
        };
        Ok(finish(&mut load))
    }

    fn dropoff(&self, load_id: Uuid, actor: Option<Uuid>) -> Result<Load, AppError> {
        let mut load = self.load_mut(load_id)?;

        let LoadState::PickedUp {
            driver_id,
            picked_up_at,
        } = load.state
        else {
            return Err(conflict(&load, "record dropoff for"));
        };
        check_actor(load_id, driver_id, actor)?;

        self.release_driver(driver_id, load_id);
        load.state = LoadState::Delivered {
            driver_id,
            picked_up_at,
            // wall clock may step backwards between the two events
            delivered_at: Utc::now().max(picked_up_at),
        };
        Ok(finish(&mut load))
    }

    fn load_mut(&self, load_id: Uuid) -> Result<RefMut<'_, Uuid, Load>, AppError> {
        self.loads.get_mut(&load_id).ok_or_else(|| not_found(load_id))
    }

    fn bind_driver(&self, driver_id: Uuid, load_id: Uuid) -> Result<(), AppError> {
        match self.active_by_driver.entry(driver_id) {
            Entry::Occupied(entry) if *entry.get() != load_id => Err(AppError::InvalidDriver(
                format!("driver {driver_id} is busy with load {}", entry.get()),
            )),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(load_id);
                Ok(())
            }
        }
    }

    fn release_driver(&self, driver_id: Uuid, load_id: Uuid) {
        self.active_by_driver
            .remove_if(&driver_id, |_, active| *active == load_id);
    }
}

fn finish(load: &mut Load) -> Load {
    load.updated_at = Utc::now();
    debug_assert!(load.invariants_hold(), "load invariants violated: {load:?}");
    debug!(load_id = %load.id, status = load.status().as_str(), "load transitioned");
    load.clone()
}

fn check_actor(load_id: Uuid, assigned: Uuid, actor: Option<Uuid>) -> Result<(), AppError> {
    match actor {
        Some(actor) if actor != assigned => Err(AppError::InvalidDriver(format!(
            "load {load_id} is not assigned to driver {actor}"
        ))),
        _ => Ok(()),
    }
}

fn not_found(load_id: Uuid) -> AppError {
    AppError::NotFound(format!("load {load_id} not found"))
}

fn conflict(load: &Load, action: &str) -> AppError {
    AppError::Conflict(format!(
        "cannot {action} load {} in status {}",
        load.id,
        load.status().as_str()
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use uuid::Uuid;

    use super::AssignmentEngine;
    use crate::engine::shift::ShiftTracker;
    use crate::error::AppError;
    use crate::models::driver::GeoPoint;
    use crate::models::load::{DriverStatus, LoadStatus, NewLoad};

    fn new_load() -> NewLoad {
        NewLoad {
            pickup: GeoPoint { lat: 10.0, lng: 10.0 },
            dropoff: GeoPoint { lat: 20.0, lng: 20.0 },
            created_by: Uuid::from_u128(100),
        }
    }

    fn on_shift(tracker: &ShiftTracker, seed: u128) -> Uuid {
        let driver = Uuid::from_u128(seed);
        tracker.start_shift(driver).unwrap();
        driver
    }

    #[test]
    fn full_lifecycle_sets_ordered_timestamps() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let load = engine.create(new_load());
        assert_eq!(load.status(), LoadStatus::AwaitingDriver);

        let assigned = engine.assign(load.id, driver, &shifts).unwrap();
        assert_eq!(assigned.status(), LoadStatus::Assigned);
        assert_eq!(assigned.assigned_driver_id(), Some(driver));
        assert_eq!(assigned.state.driver_status(), DriverStatus::Assigned);
        assert_eq!(engine.active_load_for(driver), Some(load.id));

        let picked = engine.record_pickup(load.id).unwrap();
        assert_eq!(picked.status(), LoadStatus::PickedUp);
        assert!(picked.invariants_hold());

        let delivered = engine.record_dropoff(load.id).unwrap();
        assert_eq!(delivered.status(), LoadStatus::Delivered);
        assert_eq!(delivered.state.driver_status(), DriverStatus::Completed);
        let pickup_at = delivered.state.picked_up_at().unwrap();
        let dropoff_at = delivered.state.delivered_at().unwrap();
        assert!(pickup_at <= dropoff_at);
        assert!(delivered.invariants_hold());
        assert!(!engine.is_busy(driver));
    }

    #[test]
    fn assign_requires_on_shift_driver() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let load = engine.create(new_load());

        let result = engine.assign(load.id, Uuid::from_u128(5), &shifts);
        assert!(matches!(result, Err(AppError::InvalidDriver(_))));
        assert_eq!(engine.get(load.id).unwrap().status(), LoadStatus::AwaitingDriver);
    }

    #[test]
    fn second_assign_is_a_conflict() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let first = on_shift(&shifts, 1);
        let second = on_shift(&shifts, 2);
        let load = engine.create(new_load());

        engine.assign(load.id, first, &shifts).unwrap();
        assert!(matches!(
            engine.assign(load.id, second, &shifts),
            Err(AppError::Conflict(_))
        ));
        assert!(!engine.is_busy(second));
    }

    #[test]
    fn busy_driver_cannot_take_another_load() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let first = engine.create(new_load());
        let second = engine.create(new_load());

        engine.assign(first.id, driver, &shifts).unwrap();
        assert!(matches!(
            engine.assign(second.id, driver, &shifts),
            Err(AppError::InvalidDriver(_))
        ));
        assert!(engine.get(second.id).unwrap().invariants_hold());
    }

    #[test]
    fn concurrent_assign_admits_exactly_one() {
        for _ in 0..32 {
            let engine = Arc::new(AssignmentEngine::new());
            let shifts = Arc::new(ShiftTracker::new());
            let drivers = [on_shift(&shifts, 1), on_shift(&shifts, 2)];
            let load_id = engine.create(new_load()).id;
            let barrier = Arc::new(Barrier::new(drivers.len()));

            let handles: Vec<_> = drivers
                .into_iter()
                .map(|driver| {
                    let engine = engine.clone();
                    let shifts = shifts.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        engine.assign(load_id, driver, &shifts)
                    })
                })
                .collect();

            let results: Vec<_> = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert_eq!(
                results
                    .iter()
                    .filter(|r| matches!(r, Err(AppError::Conflict(_))))
                    .count(),
                1
            );

            let stored = engine.get(load_id).unwrap();
            assert!(stored.invariants_hold());
            let winner = stored.assigned_driver_id().unwrap();
            assert_eq!(engine.active_load_for(winner), Some(load_id));
        }
    }

    #[test]
    fn pickup_and_dropoff_reject_out_of_order_calls() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let load = engine.create(new_load());

        assert!(matches!(engine.record_pickup(load.id), Err(AppError::Conflict(_))));
        assert!(matches!(engine.record_dropoff(load.id), Err(AppError::Conflict(_))));

        engine.assign(load.id, driver, &shifts).unwrap();
        assert!(matches!(engine.record_dropoff(load.id), Err(AppError::Conflict(_))));
    }

    #[test]
    fn driver_scoped_transitions_check_the_assignee() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let stranger = Uuid::from_u128(2);
        let load = engine.create(new_load());
        engine.assign(load.id, driver, &shifts).unwrap();

        assert!(matches!(
            engine.record_pickup_by(load.id, stranger),
            Err(AppError::InvalidDriver(_))
        ));
        engine.record_pickup_by(load.id, driver).unwrap();
        assert!(matches!(
            engine.record_dropoff_by(load.id, stranger),
            Err(AppError::InvalidDriver(_))
        ));
        engine.record_dropoff_by(load.id, driver).unwrap();
    }

    #[test]
    fn cancel_is_terminal() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let load = engine.create(new_load());

        let cancelled = engine.cancel(load.id).unwrap();
        assert_eq!(cancelled.status(), LoadStatus::Cancelled);
        assert!(cancelled.invariants_hold());

        assert!(matches!(engine.cancel(load.id), Err(AppError::Conflict(_))));
        assert!(matches!(
            engine.assign(load.id, driver, &shifts),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(engine.record_pickup(load.id), Err(AppError::Conflict(_))));
    }

    #[test]
    fn cancelling_a_delivered_load_conflicts() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let load = engine.create(new_load());
        engine.assign(load.id, driver, &shifts).unwrap();
        engine.record_pickup(load.id).unwrap();
        engine.record_dropoff(load.id).unwrap();

        assert!(matches!(engine.cancel(load.id), Err(AppError::Conflict(_))));
        assert_eq!(engine.get(load.id).unwrap().status(), LoadStatus::Delivered);
    }

    #[test]
    fn cancelling_an_assigned_load_frees_the_driver() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let load = engine.create(new_load());
        engine.assign(load.id, driver, &shifts).unwrap();
        engine.record_pickup(load.id).unwrap();

        let cancelled = engine.cancel(load.id).unwrap();
        assert!(cancelled.assigned_driver_id().is_none());
        assert!(cancelled.state.picked_up_at().is_some());
        assert!(!engine.is_busy(driver));
    }

    #[test]
    fn reassign_moves_binding_and_keeps_pickup_time() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let first = on_shift(&shifts, 1);
        let second = on_shift(&shifts, 2);
        let load = engine.create(new_load());
        engine.assign(load.id, first, &shifts).unwrap();
        let picked = engine.record_pickup(load.id).unwrap();

        let moved = engine.reassign(load.id, second, &shifts).unwrap();
        assert_eq!(moved.status(), LoadStatus::PickedUp);
        assert_eq!(moved.assigned_driver_id(), Some(second));
        assert_eq!(moved.state.picked_up_at(), picked.state.picked_up_at());
        assert!(!engine.is_busy(first));
        assert_eq!(engine.active_load_for(second), Some(load.id));

        assert!(matches!(
            engine.reassign(load.id, second, &shifts),
            Err(AppError::InvalidDriver(_))
        ));
    }

    #[test]
    fn reassign_requires_an_active_load() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let load = engine.create(new_load());

        assert!(matches!(
            engine.reassign(load.id, driver, &shifts),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn list_filters_by_status() {
        let engine = AssignmentEngine::new();
        let shifts = ShiftTracker::new();
        let driver = on_shift(&shifts, 1);
        let first = engine.create(new_load());
        let second = engine.create(new_load());
        engine.assign(first.id, driver, &shifts).unwrap();

        assert_eq!(engine.list(None).len(), 2);
        let awaiting = engine.list(Some(LoadStatus::AwaitingDriver));
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].id, second.id);
        assert!(matches!(engine.get(Uuid::nil()), Err(AppError::NotFound(_))));
    }
}
