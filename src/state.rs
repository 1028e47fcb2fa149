use crate::auth::{hash_secret, SessionStore};
use crate::config::Config;
use crate::engine::coordinator::{DispatchCoordinator, DispatchSettings};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub coordinator: DispatchCoordinator,
    pub sessions: SessionStore,
    pub admin_key_hash: String,
    pub metrics: Metrics,
    pub static_dir: String,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let metrics = Metrics::new();
        let settings = DispatchSettings {
            max_pickup_distance_km: config.max_pickup_distance_km,
            event_buffer_size: config.event_buffer_size,
        };

        Self {
            coordinator: DispatchCoordinator::new(settings, metrics.clone()),
            sessions: SessionStore::new(config.session_ttl_secs),
            admin_key_hash: hash_secret(&config.admin_api_key),
            metrics,
            static_dir: config.static_dir.clone(),
        }
    }
}
