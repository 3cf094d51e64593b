//! Configuration loading and representation.
//!
//! Everything comes from environment variables; unset variables fall back to
//! defaults suitable for local development (in-memory storage on `0.0.0.0:8080`).

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use warehousing_observability::LogFormat;

use crate::reservation::EngineConfig;

pub const BIND_ADDR: &str = "WAREHOUSING_BIND_ADDR";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS: &str = "WAREHOUSING_DB_MAX_CONNECTIONS";
pub const RESERVE_MAX_RETRIES: &str = "WAREHOUSING_RESERVE_MAX_RETRIES";
pub const RESERVE_RETRY_BACKOFF_MS: &str = "WAREHOUSING_RESERVE_RETRY_BACKOFF_MS";
pub const LOG_FORMAT: &str = "WAREHOUSING_LOG_FORMAT";
pub const SEED_DEMO: &str = "WAREHOUSING_SEED_DEMO";

/// Upper bound for the retry backoff step.
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value '{value}' for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory backends.
    pub database: Option<DatabaseConfig>,
    pub engine: EngineConfig,
    pub log_format: LogFormat,
    pub seed_demo: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse(BIND_ADDR, get(BIND_ADDR), "0.0.0.0:8080".parse().ok())?;
        let max_connections: u32 = parse(DB_MAX_CONNECTIONS, get(DB_MAX_CONNECTIONS), Some(10))?;
        let database = get(DATABASE_URL).map(|url| DatabaseConfig {
            url,
            max_connections,
        });

        let defaults = EngineConfig::default();
        let max_retries = parse(RESERVE_MAX_RETRIES, get(RESERVE_MAX_RETRIES), Some(defaults.max_retries))?;
        let backoff_ms: u64 = parse(
            RESERVE_RETRY_BACKOFF_MS,
            get(RESERVE_RETRY_BACKOFF_MS),
            Some(defaults.retry_backoff.as_millis() as u64),
        )?;
        if backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ConfigError {
                var: RESERVE_RETRY_BACKOFF_MS,
                value: backoff_ms.to_string(),
                reason: format!("must be at most {MAX_RETRY_BACKOFF_MS}"),
            });
        }

        let log_format = parse(LOG_FORMAT, get(LOG_FORMAT), Some(LogFormat::Json))?;
        let seed_demo = parse(SEED_DEMO, get(SEED_DEMO), Some(false))?;

        Ok(Self {
            bind_addr,
            database,
            engine: EngineConfig {
                max_retries,
                retry_backoff: Duration::from_millis(backoff_ms),
            },
            log_format,
            seed_demo,
        })
    }
}

fn parse<T>(var: &'static str, raw: Option<String>, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError {
            var,
            reason: e.to_string(),
            value,
        }),
        None => default.ok_or_else(|| ConfigError {
            var,
            value: String::new(),
            reason: "missing".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_select_in_memory_storage() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert!(cfg.database.is_none());
        assert_eq!(cfg.engine, EngineConfig::default());
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(!cfg.seed_demo);
    }

    #[test]
    fn database_and_engine_settings_are_read() {
        let cfg = config(&[
            (DATABASE_URL, "postgres://localhost/warehousing"),
            (DB_MAX_CONNECTIONS, "4"),
            (RESERVE_MAX_RETRIES, "7"),
            (RESERVE_RETRY_BACKOFF_MS, "20"),
            (LOG_FORMAT, "compact"),
            (SEED_DEMO, "true"),
        ])
        .unwrap();

        let db = cfg.database.unwrap();
        assert_eq!(db.url, "postgres://localhost/warehousing");
        assert_eq!(db.max_connections, 4);
        assert_eq!(cfg.engine.max_retries, 7);
        assert_eq!(cfg.engine.retry_backoff, Duration::from_millis(20));
        assert_eq!(cfg.log_format, LogFormat::Compact);
        assert!(cfg.seed_demo);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[(DATABASE_URL, "  "), (BIND_ADDR, "")]).unwrap();
        assert!(cfg.database.is_none());
        assert_eq!(cfg.bind_addr.port(), 8080);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[(RESERVE_MAX_RETRIES, "many")]).unwrap_err();
        assert_eq!(err.var, RESERVE_MAX_RETRIES);
        assert_eq!(err.value, "many");

        assert!(config(&[(LOG_FORMAT, "xml")]).is_err());
        assert!(config(&[(BIND_ADDR, "nowhere")]).is_err());
    }

    #[test]
    fn oversized_backoff_is_rejected() {
        let err = config(&[(RESERVE_RETRY_BACKOFF_MS, "18446744073709551615")]).unwrap_err();
        assert_eq!(err.var, RESERVE_RETRY_BACKOFF_MS);

        let cfg = config(&[(RESERVE_RETRY_BACKOFF_MS, "60000")]).unwrap();
        assert_eq!(cfg.engine.retry_backoff, Duration::from_secs(60));
    }
}
