use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(AppError::Validation(format!(
                "latitude {} must be within [-90, 90]",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(AppError::Validation(format!(
                "longitude {} must be within [-180, 180]",
                self.lng
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ShiftState {
    #[default]
    OffShift,
    OnShift { started_at: DateTime<Utc> },
}

impl ShiftState {
    pub fn is_on_shift(&self) -> bool {
        matches!(self, ShiftState::OnShift { .. })
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ShiftState::OnShift { started_at } => Some(*started_at),
            ShiftState::OffShift => None,
        }
    }
}

// Shift and position live in their own trackers.
#[derive(Debug, Clone)]
pub struct DriverProfile {
    pub id: Uuid,
    pub name: String,
    pub access_code_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(into = "DriverRecord")]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub position: Option<GeoPoint>,
    pub is_on_shift: bool,
    pub shift_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn from_parts(profile: &DriverProfile, shift: ShiftState, position: Option<GeoPoint>) -> Self {
        Self {
            id: profile.id,
            name: profile.name.clone(),
            position,
            is_on_shift: shift.is_on_shift(),
            shift_started_at: shift.started_at(),
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: Uuid,
    pub name: String,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub is_on_shift: bool,
    pub shift_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Driver> for DriverRecord {
    fn from(driver: Driver) -> Self {
        Self {
            id: driver.id,
            name: driver.name,
            current_latitude: driver.position.map(|point| point.lat),
            current_longitude: driver.position.map(|point| point.lng),
            is_on_shift: driver.is_on_shift,
            shift_started_at: driver.shift_started_at,
            created_at: driver.created_at,
            updated_at: driver.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value;
    use uuid::Uuid;

    use super::{Driver, DriverProfile, GeoPoint, ShiftState};

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoPoint { lat: 91.0, lng: 0.0 }.validate().is_err());
        assert!(GeoPoint { lat: 0.0, lng: -180.5 }.validate().is_err());
        assert!(GeoPoint { lat: f64::NAN, lng: 0.0 }.validate().is_err());
        assert!(GeoPoint { lat: -90.0, lng: 180.0 }.validate().is_ok());
    }

    fn profile() -> DriverProfile {
        let now = Utc::now();
        DriverProfile {
            id: Uuid::from_u128(1),
            name: "Ada".to_string(),
            access_code_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn shift_start_is_present_only_while_on_shift() {
        let profile = profile();

        let off = Driver::from_parts(&profile, ShiftState::OffShift, None);
        assert!(!off.is_on_shift);
        assert!(off.shift_started_at.is_none());

        let started_at = Utc::now();
        let on = Driver::from_parts(&profile, ShiftState::OnShift { started_at }, None);
        assert!(on.is_on_shift);
        assert_eq!(on.shift_started_at, Some(started_at));
    }

    #[test]
    fn serializes_position_as_flat_nullable_coordinates() {
        let profile = profile();

        let unplaced = Driver::from_parts(&profile, ShiftState::OffShift, None);
        let value: Value = serde_json::to_value(&unplaced).unwrap();
        assert!(value["current_latitude"].is_null());
        assert!(value["current_longitude"].is_null());
        assert!(value.get("position").is_none());
        assert!(value["updated_at"].is_string());

        let placed = Driver::from_parts(
            &profile,
            ShiftState::OffShift,
            Some(GeoPoint { lat: 41.5, lng: -87.25 }),
        );
        let value: Value = serde_json::to_value(&placed).unwrap();
        assert_eq!(value["current_latitude"], 41.5);
        assert_eq!(value["current_longitude"], -87.25);
    }
}
