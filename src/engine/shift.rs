use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::ShiftState;

#[derive(Default)]
pub struct ShiftTracker {
    shifts: DashMap<Uuid, ShiftState>,
}

impl ShiftTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_shift(&self, driver_id: Uuid) -> Result<DateTime<Utc>, AppError> {
        let mut shift = self.shifts.entry(driver_id).or_default();

        if let ShiftState::OnShift { started_at } = *shift {
            return Err(AppError::InvalidTransition(format!(
                "driver {driver_id} already on shift since {started_at}"
            )));
        }

        let started_at = Utc::now();
        *shift = ShiftState::OnShift { started_at };
        Ok(started_at)
    }

    pub fn end_shift(&self, driver_id: Uuid) -> Result<DateTime<Utc>, AppError> {
        let mut shift = self
            .shifts
            .get_mut(&driver_id)
            .ok_or_else(|| off_shift(driver_id))?;

        let started_at = shift.started_at().ok_or_else(|| off_shift(driver_id))?;
        *shift = ShiftState::OffShift;
        Ok(started_at)
    }

    pub fn state(&self, driver_id: Uuid) -> ShiftState {
        self.shifts
            .get(&driver_id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    pub fn is_on_shift(&self, driver_id: Uuid) -> bool {
        self.state(driver_id).is_on_shift()
    }

    pub fn on_shift_drivers(&self) -> HashSet<Uuid> {
        self.shifts
            .iter()
            .filter(|entry| entry.value().is_on_shift())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn on_shift_count(&self) -> usize {
        self.shifts
            .iter()
            .filter(|entry| entry.value().is_on_shift())
            .count()
    }

    /// Runs `f` while holding the driver's shift entry, so a concurrent
    /// `end_shift` for the same driver waits until `f` returns.
    pub fn while_on_shift<T>(
        &self,
        driver_id: Uuid,
        f: impl FnOnce() -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let shift = self
            .shifts
            .get(&driver_id)
            .filter(|entry| entry.value().is_on_shift())
            .ok_or_else(|| AppError::InvalidDriver(format!("driver {driver_id} is not on shift")))?;

        let result = f();
        drop(shift);
        result
    }
}

fn off_shift(driver_id: Uuid) -> AppError {
    AppError::InvalidTransition(format!("driver {driver_id} is not on shift"))
}
