use std::env;

use crate::error::AppError;

const DEV_ADMIN_API_KEY: &str = "dev-admin-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}, expected compact/json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub max_pickup_distance_km: Option<f64>,
    pub admin_api_key: String,
    pub session_ttl_secs: u64,
    pub static_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            max_pickup_distance_km: None,
            admin_api_key: DEV_ADMIN_API_KEY.to_string(),
            session_ttl_secs: 12 * 60 * 60,
            static_dir: "static".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let max_pickup_distance_km = parse_optional::<f64>("MAX_PICKUP_DISTANCE_KM")?;
        if let Some(km) = max_pickup_distance_km {
            if !km.is_finite() || km <= 0.0 {
                return Err(AppError::Internal(format!(
                    "invalid MAX_PICKUP_DISTANCE_KM: {km} must be > 0"
                )));
            }
        }

        let admin_api_key = match env::var("ADMIN_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ if parse_or_default("ALLOW_DEV_ADMIN_KEY", false)? => defaults.admin_api_key,
            _ => {
                return Err(AppError::Internal(
                    "ADMIN_API_KEY must be set (or ALLOW_DEV_ADMIN_KEY=true)".to_string(),
                ));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or_default("LOG_FORMAT", defaults.log_format)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            max_pickup_distance_km,
            admin_api_key,
            session_ttl_secs: parse_or_default("SESSION_TTL_SECS", defaults.session_ttl_secs)?,
            static_dir: env::var("STATIC_DIR").unwrap_or(defaults.static_dir),
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}
