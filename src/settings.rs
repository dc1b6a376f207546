//! Server settings from the environment. Call `dotenvy::dotenv()` first to pick up a `.env` file.

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/model_ctrl";
pub const DEFAULT_MODELS_PATH: &str = "models.json";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub models_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub body_limit_bytes: usize,
    /// Run `apply_migrations` on startup.
    pub sync_schema: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
        let bind_addr = bind
            .parse()
            .map_err(|_| ConfigError::Load(format!("BIND_ADDR: invalid socket address '{}'", bind)))?;
        Ok(Settings {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            models_path: get("MODELS_PATH").unwrap_or_else(|| DEFAULT_MODELS_PATH.into()).into(),
            bind_addr,
            max_connections: parse_or(&get, "MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            body_limit_bytes: parse_or(&get, "BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT_BYTES)?,
            sync_schema: get("SYNC_SCHEMA")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        })
    }
}

fn parse_or<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Load(format!("{}: invalid value '{}'", key, v))),
        None => Ok(default),
    }
}
