use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

pub fn secret_matches(provided: &str, expected_hash: &str) -> bool {
    let provided_hash = hash_secret(provided);
    provided_hash
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Admin(Uuid),
    Driver(Uuid),
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    principal: Principal,
    expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        let ttl_secs = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Self {
            sessions: DashMap::new(),
            ttl: Duration::try_seconds(ttl_secs).unwrap_or(Duration::MAX),
        }
    }

    pub fn issue(&self, principal: Principal) -> IssuedSession {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.sessions.insert(
            token.clone(),
            Session {
                principal,
                expires_at,
            },
        );

        IssuedSession {
            token,
            expires_at,
            principal,
        }
    }

    pub fn resolve(&self, token: &str) -> Result<Principal, AppError> {
        let session = self
            .sessions
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::Unauthorized("unknown session".to_string()))?;

        if session.expires_at <= Utc::now() {
            self.sessions.remove(token);
            return Err(AppError::Unauthorized("session expired".to_string()));
        }

        Ok(session.principal)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))
}

fn principal_from(parts: &Parts, state: &AppState) -> Result<Principal, AppError> {
    state.sessions.resolve(bearer_token(&parts.headers)?)
}

#[derive(Debug, Clone, Copy)]
pub struct AdminSession(pub Uuid);

#[derive(Debug, Clone, Copy)]
pub struct DriverSession(pub Uuid);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match principal_from(parts, state)? {
            Principal::Admin(id) => Ok(AdminSession(id)),
            Principal::Driver(_) => Err(AppError::Forbidden("admin session required".to_string())),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for DriverSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match principal_from(parts, state)? {
            Principal::Driver(id) => Ok(DriverSession(id)),
            Principal::Admin(_) => Err(AppError::Forbidden("driver session required".to_string())),
        }
    }
}
