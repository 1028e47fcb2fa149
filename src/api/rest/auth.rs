use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{bearer_token, secret_matches, IssuedSession, Principal};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/login", post(admin_login))
        .route("/driver/login", post(driver_login))
        .route("/logout", post(logout))
}

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    pub admin_id: Uuid,
    pub api_key: String,
}

#[derive(Deserialize)]
pub struct DriverLoginRequest {
    pub driver_id: Uuid,
    pub access_code: String,
}

async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AdminLoginRequest>,
) -> Result<Json<IssuedSession>, AppError> {
    if !secret_matches(&payload.api_key, &state.admin_key_hash) {
        warn!(admin_id = %payload.admin_id, "admin login rejected");
        return Err(AppError::Unauthorized("invalid admin credentials".to_string()));
    }

    let session = state.sessions.issue(Principal::Admin(payload.admin_id));
    info!(admin_id = %payload.admin_id, "admin logged in");
    Ok(Json(session))
}

async fn driver_login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DriverLoginRequest>,
) -> Result<Json<IssuedSession>, AppError> {
    state
        .coordinator
        .verify_driver_code(payload.driver_id, &payload.access_code)
        .inspect_err(|_| warn!(driver_id = %payload.driver_id, "driver login rejected"))?;

    let session = state.sessions.issue(Principal::Driver(payload.driver_id));
    info!(driver_id = %payload.driver_id, "driver logged in");
    Ok(Json(session))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers)?;
    if state.sessions.revoke(token) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Unauthorized("unknown session".to_string()))
    }
}
