//! Server configuration parsed from environment variables.
//!
//! Required:
//! - `JWT_SECRET`: HS256 secret shared with the credential issuer
//!
//! Optional:
//! - `PORT`: listen port (default 3001)
//! - `DATABASE_URL`: Postgres URL; the in-memory store is used when absent
//! - `DB_MAX_CONNECTIONS`: pool size (default 5)
//! - `STORE_SEED_FILE`: JSON users/rooms seed for the in-memory store
//! - `CLIENT_URL`, `PRODUCTION_URL`: allowed CORS origins (any when both absent)
//! - `OUTBOUND_QUEUE_CAPACITY`: per-connection outbound buffer (default 256)
//! - `CURSOR_MIN_INTERVAL_MS`: minimum gap between relayed cursor updates per
//!   connection (default 0, every update is relayed)

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_CURSOR_MIN_INTERVAL_MS: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub store_seed_file: Option<PathBuf>,
    pub allowed_origins: Vec<String>,
    pub outbound_queue_capacity: usize,
    pub cursor_min_interval_ms: u64,
}

impl Config {
    /// Build config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `JWT_SECRET` is missing or `PORT` is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// Malformed tuning values fall back to their defaults; a malformed
    /// `PORT` is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if `JWT_SECRET` is missing or `PORT` is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = non_empty(lookup("JWT_SECRET")).ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let port = match non_empty(lookup("PORT")) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };

        let allowed_origins = ["CLIENT_URL", "PRODUCTION_URL"]
            .into_iter()
            .filter_map(|key| non_empty(lookup(key)))
            .collect();

        // A zero-capacity mpsc channel panics on construction.
        let outbound_queue_capacity =
            parse_or(&lookup, "OUTBOUND_QUEUE_CAPACITY", DEFAULT_OUTBOUND_QUEUE_CAPACITY).max(1);

        Ok(Self {
            port,
            jwt_secret,
            database_url: non_empty(lookup("DATABASE_URL")),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            store_seed_file: non_empty(lookup("STORE_SEED_FILE")).map(PathBuf::from),
            allowed_origins,
            outbound_queue_capacity,
            cursor_min_interval_ms: parse_or(&lookup, "CURSOR_MIN_INTERVAL_MS", DEFAULT_CURSOR_MIN_INTERVAL_MS),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
