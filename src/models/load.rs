use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    AwaitingDriver,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

impl LoadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadStatus::Delivered | LoadStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::AwaitingDriver => "awaiting_driver",
            LoadStatus::Assigned => "assigned",
            LoadStatus::PickedUp => "picked_up",
            LoadStatus::Delivered => "delivered",
            LoadStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Unassigned,
    Assigned,
    EnRoute,
    Completed,
}

/// Load lifecycle. Each variant carries exactly the fields valid in that
/// state, so a driver reference cannot exist on an unassigned load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadState {
    AwaitingDriver,
    Assigned {
        driver_id: Uuid,
    },
    PickedUp {
        driver_id: Uuid,
        picked_up_at: DateTime<Utc>,
    },
    Delivered {
        driver_id: Uuid,
        picked_up_at: DateTime<Utc>,
        delivered_at: DateTime<Utc>,
    },
    Cancelled {
        picked_up_at: Option<DateTime<Utc>>,
    },
}

impl LoadState {
    pub fn status(&self) -> LoadStatus {
        match self {
            LoadState::AwaitingDriver => LoadStatus::AwaitingDriver,
            LoadState::Assigned { .. } => LoadStatus::Assigned,
            LoadState::PickedUp { .. } => LoadStatus::PickedUp,
            LoadState::Delivered { .. } => LoadStatus::Delivered,
            LoadState::Cancelled { .. } => LoadStatus::Cancelled,
        }
    }

    pub fn driver_status(&self) -> DriverStatus {
        match self {
            LoadState::AwaitingDriver | LoadState::Cancelled { .. } => DriverStatus::Unassigned,
            LoadState::Assigned { .. } => DriverStatus::Assigned,
            LoadState::PickedUp { .. } => DriverStatus::EnRoute,
            LoadState::Delivered { .. } => DriverStatus::Completed,
        }
    }

    pub fn driver_id(&self) -> Option<Uuid> {
        match self {
            LoadState::Assigned { driver_id }
            | LoadState::PickedUp { driver_id, .. }
            | LoadState::Delivered { driver_id, .. } => Some(*driver_id),
            LoadState::AwaitingDriver | LoadState::Cancelled { .. } => None,
        }
    }

    pub fn picked_up_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LoadState::PickedUp { picked_up_at, .. } | LoadState::Delivered { picked_up_at, .. } => {
                Some(*picked_up_at)
            }
            LoadState::Cancelled { picked_up_at } => *picked_up_at,
            LoadState::AwaitingDriver | LoadState::Assigned { .. } => None,
        }
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LoadState::Delivered { delivered_at, .. } => Some(*delivered_at),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLoad {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(into = "LoadRecord")]
pub struct Load {
    pub id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub state: LoadState,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Load {
    pub fn new(new_load: NewLoad) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pickup: new_load.pickup,
            dropoff: new_load.dropoff,
            state: LoadState::AwaitingDriver,
            created_by: new_load.created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> LoadStatus {
        self.state.status()
    }

    pub fn assigned_driver_id(&self) -> Option<Uuid> {
        self.state.driver_id()
    }

    pub fn invariants_hold(&self) -> bool {
        let status = self.status();
        let has_driver = self.assigned_driver_id().is_some();
        let expects_driver = !matches!(status, LoadStatus::AwaitingDriver | LoadStatus::Cancelled);

        let ordered = match (self.state.picked_up_at(), self.state.delivered_at()) {
            (Some(pickup), Some(dropoff)) => pickup <= dropoff,
            (None, Some(_)) => false,
            _ => true,
        };

        has_driver == expects_driver && ordered
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRecord {
    pub id: Uuid,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub status: LoadStatus,
    pub driver_status: DriverStatus,
    pub assigned_driver_id: Option<Uuid>,
    pub created_by: Uuid,
    pub pickup_completed_at: Option<DateTime<Utc>>,
    pub dropoff_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Load> for LoadRecord {
    fn from(load: Load) -> Self {
        Self {
            id: load.id,
            pickup_latitude: load.pickup.lat,
            pickup_longitude: load.pickup.lng,
            dropoff_latitude: load.dropoff.lat,
            dropoff_longitude: load.dropoff.lng,
            status: load.state.status(),
            driver_status: load.state.driver_status(),
            assigned_driver_id: load.state.driver_id(),
            created_by: load.created_by,
            pickup_completed_at: load.state.picked_up_at(),
            dropoff_completed_at: load.state.delivered_at(),
            created_at: load.created_at,
            updated_at: load.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Value;
    use uuid::Uuid;

    use super::{Load, LoadState, NewLoad};
    use crate::models::driver::GeoPoint;

    fn load() -> Load {
        Load::new(NewLoad {
            pickup: GeoPoint { lat: 10.0, lng: 10.0 },
            dropoff: GeoPoint { lat: 20.0, lng: 20.0 },
            created_by: Uuid::from_u128(99),
        })
    }

    #[test]
    fn serializes_flat_wire_shape() {
        let mut load = load();
        let driver_id = Uuid::from_u128(7);
        let picked_up_at = Utc::now();
        load.state = LoadState::PickedUp {
            driver_id,
            picked_up_at,
        };

        let value: Value = serde_json::to_value(&load).unwrap();
        assert_eq!(value["status"], "picked_up");
        assert_eq!(value["driver_status"], "en_route");
        assert_eq!(value["assigned_driver_id"], driver_id.to_string());
        assert!(value["pickup_completed_at"].is_string());
        assert!(value["dropoff_completed_at"].is_null());
        assert_eq!(value["pickup_latitude"], 10.0);
        assert_eq!(value["pickup_longitude"], 10.0);
        assert_eq!(value["dropoff_latitude"], 20.0);
        assert_eq!(value["dropoff_longitude"], 20.0);
        assert!(value.get("pickup").is_none());
        assert!(value.get("dropoff").is_none());
    }

    #[test]
    fn cancelled_load_reports_no_driver() {
        let mut load = load();
        load.state = LoadState::Cancelled { picked_up_at: None };

        let value: Value = serde_json::to_value(&load).unwrap();
        assert_eq!(value["status"], "cancelled");
        assert_eq!(value["driver_status"], "unassigned");
        assert!(value["assigned_driver_id"].is_null());
        assert!(load.invariants_hold());
    }

    #[test]
    fn invariants_catch_reversed_timestamps() {
        let mut load = load();
        let now = Utc::now();
        load.state = LoadState::Delivered {
            driver_id: Uuid::from_u128(1),
            picked_up_at: now,
            delivered_at: now - Duration::seconds(5),
        };
        assert!(!load.invariants_hold());
    }
}
