use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    LoadCreated {
        load_id: Uuid,
        created_by: Uuid,
    },
    LoadAssigned {
        load_id: Uuid,
        driver_id: Uuid,
        distance_km: Option<f64>,
    },
    LoadPending {
        load_id: Uuid,
    },
    LoadPickedUp {
        load_id: Uuid,
        driver_id: Uuid,
    },
    LoadDelivered {
        load_id: Uuid,
        driver_id: Uuid,
    },
    LoadCancelled {
        load_id: Uuid,
    },
    ReassignmentNeeded {
        load_id: Uuid,
        driver_id: Uuid,
    },
    ShiftStarted {
        driver_id: Uuid,
    },
    ShiftEnded {
        driver_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReassignmentNeeded {
    pub load_id: Uuid,
    pub driver_id: Uuid,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Assigned {
        driver_id: Uuid,
        distance_km: f64,
    },
    Pending,
}
