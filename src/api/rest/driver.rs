use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::auth::DriverSession;
use crate::engine::coordinator::{DriverStatusView, ShiftEnded};
use crate::error::AppError;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::load::Load;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/driver/shift/start", post(start_shift))
        .route("/driver/shift/end", post(end_shift))
        .route("/driver/location", post(update_location))
        .route("/driver/status", get(driver_status))
        .route("/driver/loads/:id/pickup", post(record_pickup))
        .route("/driver/loads/:id/dropoff", post(record_dropoff))
}

async fn start_shift(
    State(state): State<Arc<AppState>>,
    DriverSession(driver_id): DriverSession,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.coordinator.start_shift(driver_id)?))
}

async fn end_shift(
    State(state): State<Arc<AppState>>,
    DriverSession(driver_id): DriverSession,
) -> Result<Json<ShiftEnded>, AppError> {
    Ok(Json(state.coordinator.end_shift(driver_id)?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    DriverSession(driver_id): DriverSession,
    Json(location): Json<GeoPoint>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.coordinator.report_location(driver_id, location)?))
}

async fn driver_status(
    State(state): State<Arc<AppState>>,
    DriverSession(driver_id): DriverSession,
) -> Result<Json<DriverStatusView>, AppError> {
    Ok(Json(state.coordinator.driver_status(driver_id)?))
}

async fn record_pickup(
    State(state): State<Arc<AppState>>,
    DriverSession(driver_id): DriverSession,
    Path(load_id): Path<Uuid>,
) -> Result<Json<Load>, AppError> {
    Ok(Json(state.coordinator.record_pickup(driver_id, load_id)?))
}

async fn record_dropoff(
    State(state): State<Arc<AppState>>,
    DriverSession(driver_id): DriverSession,
    Path(load_id): Path<Uuid>,
) -> Result<Json<Load>, AppError> {
    Ok(Json(state.coordinator.record_dropoff(driver_id, load_id)?))
}
