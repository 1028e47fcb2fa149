use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AdminSession;
use crate::engine::coordinator::{PendingLoad, RegisteredDriver, RetryResult};
use crate::error::AppError;
use crate::models::driver::{Driver, GeoPoint};
use crate::models::event::{DispatchOutcome, ReassignmentNeeded};
use crate::models::load::{Load, LoadStatus, NewLoad};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/drivers", post(register_driver).get(list_drivers))
        .route("/admin/loads", post(create_load).get(list_loads))
        .route("/admin/loads/:id", get(get_load))
        .route("/admin/loads/:id/assign", post(assign_load))
        .route("/admin/loads/:id/cancel", post(cancel_load))
        .route("/admin/dispatch/retry", post(retry_pending))
        .route("/admin/dispatch/pending", get(list_pending))
        .route("/admin/dispatch/reassignments", get(list_reassignments))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateLoadRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Deserialize)]
pub struct ListLoadsQuery {
    pub status: Option<LoadStatus>,
}

#[derive(Deserialize)]
pub struct AssignLoadRequest {
    pub driver_id: Uuid,
}

#[derive(Serialize)]
pub struct CreatedLoad {
    #[serde(flatten)]
    pub load: Load,
    pub dispatch: DispatchOutcome,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<(StatusCode, Json<RegisteredDriver>), AppError> {
    let registered = state.coordinator.register_driver(&payload.name)?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
) -> Json<Vec<Driver>> {
    Json(state.coordinator.drivers())
}

async fn create_load(
    State(state): State<Arc<AppState>>,
    AdminSession(admin_id): AdminSession,
    Json(payload): Json<CreateLoadRequest>,
) -> Result<(StatusCode, Json<CreatedLoad>), AppError> {
    let (load, dispatch) = state.coordinator.create_load(NewLoad {
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        created_by: admin_id,
    })?;

    Ok((StatusCode::CREATED, Json(CreatedLoad { load, dispatch })))
}

async fn list_loads(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
    Query(query): Query<ListLoadsQuery>,
) -> Json<Vec<Load>> {
    Json(state.coordinator.loads(query.status))
}

async fn get_load(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Load>, AppError> {
    Ok(Json(state.coordinator.load(id)?))
}

async fn assign_load(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignLoadRequest>,
) -> Result<Json<Load>, AppError> {
    Ok(Json(state.coordinator.assign_manually(id, payload.driver_id)?))
}

async fn cancel_load(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Load>, AppError> {
    Ok(Json(state.coordinator.cancel(id)?))
}

async fn retry_pending(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
) -> Json<Vec<RetryResult>> {
    Json(state.coordinator.retry_pending())
}

async fn list_pending(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
) -> Json<Vec<PendingLoad>> {
    Json(state.coordinator.pending_loads())
}

async fn list_reassignments(
    State(state): State<Arc<AppState>>,
    AdminSession(_admin): AdminSession,
) -> Json<Vec<ReassignmentNeeded>> {
    Json(state.coordinator.reassignments())
}
