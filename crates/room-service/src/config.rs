//! Room service configuration.
//!
//! Configuration is loaded from environment variables. Store and database
//! URLs may embed credentials and are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP + WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default TTL for room metadata and settings (24h).
pub const DEFAULT_ROOM_TTL_SECONDS: u64 = 86_400;

/// Default TTL for participant records and per-user indexes (1h).
pub const DEFAULT_PARTICIPANT_TTL_SECONDS: u64 = 3_600;

/// Default age after which an empty room is reclaimed (1h).
pub const DEFAULT_STALE_ROOM_SECONDS: u64 = 3_600;

/// Default bcrypt cost for room passwords.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Accepted bcrypt cost range.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// Default participant limit for new rooms.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 50;

/// Default graceful shutdown drain period.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP + WebSocket bind address (default: "0.0.0.0:3001").
    pub bind_address: String,

    /// Redis URL for the session store. `None` selects the in-memory store.
    pub redis_url: Option<SecretString>,

    /// PostgreSQL URL for the history log. `None` selects the in-memory log.
    pub database_url: Option<SecretString>,

    /// TTL for room metadata and settings.
    pub room_ttl: Duration,

    /// TTL for participant records and user indexes.
    pub participant_ttl: Duration,

    /// Empty rooms older than this are reclaimed before reuse.
    pub stale_room_after: Duration,

    /// bcrypt cost for room passwords.
    pub bcrypt_cost: u32,

    /// Participant limit applied to new rooms.
    pub default_max_participants: u32,

    /// Drain period after a shutdown signal.
    pub drain_seconds: u64,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts connection URLs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<SecretString>| if v.is_some() { "[REDACTED]" } else { "unset" };
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("redis_url", &redact(&self.redis_url))
            .field("database_url", &redact(&self.database_url))
            .field("room_ttl", &self.room_ttl)
            .field("participant_ttl", &self.participant_ttl)
            .field("stale_room_after", &self.stale_room_after)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("default_max_participants", &self.default_max_participants)
            .field("drain_seconds", &self.drain_seconds)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Invalid bcrypt cost: {0}")]
    InvalidBcryptCost(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let redis_url = non_empty(vars, "REDIS_URL").map(SecretString::from);
        let database_url = non_empty(vars, "DATABASE_URL").map(SecretString::from);

        let room_ttl = Duration::from_secs(positive_seconds(
            vars,
            "ROOM_TTL_SECONDS",
            DEFAULT_ROOM_TTL_SECONDS,
        )?);
        let participant_ttl = Duration::from_secs(positive_seconds(
            vars,
            "PARTICIPANT_TTL_SECONDS",
            DEFAULT_PARTICIPANT_TTL_SECONDS,
        )?);
        let stale_room_after = Duration::from_secs(positive_seconds(
            vars,
            "STALE_ROOM_SECONDS",
            DEFAULT_STALE_ROOM_SECONDS,
        )?);

        let bcrypt_cost = if let Some(value_str) = vars.get("BCRYPT_COST") {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidBcryptCost(format!(
                    "BCRYPT_COST must be a valid integer, got '{value_str}': {e}"
                ))
            })?;

            if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&value) {
                return Err(ConfigError::InvalidBcryptCost(format!(
                    "BCRYPT_COST must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_BCRYPT_COST
        };

        let default_max_participants = if let Some(value_str) = vars.get("DEFAULT_MAX_PARTICIPANTS")
        {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "DEFAULT_MAX_PARTICIPANTS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    "DEFAULT_MAX_PARTICIPANTS must be greater than 0".to_string(),
                ));
            }
            value
        } else {
            DEFAULT_MAX_PARTICIPANTS
        };

        let drain_seconds = vars
            .get("DRAIN_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DRAIN_SECONDS);

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        Ok(Config {
            bind_address,
            redis_url,
            database_url,
            room_ttl,
            participant_ttl,
            stale_room_after,
            bcrypt_cost,
            default_max_participants,
            drain_seconds,
            log_format,
        })
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|v| !v.trim().is_empty()).cloned()
}

fn positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.redis_url.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(config.room_ttl, Duration::from_secs(86_400));
        assert_eq!(config.participant_ttl, Duration::from_secs(3_600));
        assert_eq!(config.stale_room_after, Duration::from_secs(3_600));
        assert_eq!(config.bcrypt_cost, DEFAULT_BCRYPT_COST);
        assert_eq!(config.default_max_participants, 50);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_urls_loaded_and_redacted() {
        let config = Config::from_vars(&vars(&[
            ("REDIS_URL", "redis://:hunter2@cache:6379"),
            ("DATABASE_URL", "postgresql://room:pw@db/rooms"),
        ]))
        .unwrap();

        assert_eq!(
            config.redis_url.as_ref().unwrap().expose_secret(),
            "redis://:hunter2@cache:6379"
        );

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("postgresql://"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_empty_url_selects_in_memory() {
        let config = Config::from_vars(&vars(&[("REDIS_URL", "  ")])).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_bcrypt_cost_out_of_range() {
        let result = Config::from_vars(&vars(&[("BCRYPT_COST", "3")]));
        assert!(matches!(result, Err(ConfigError::InvalidBcryptCost(_))));

        let result = Config::from_vars(&vars(&[("BCRYPT_COST", "32")]));
        assert!(matches!(result, Err(ConfigError::InvalidBcryptCost(_))));

        let config = Config::from_vars(&vars(&[("BCRYPT_COST", "4")])).unwrap();
        assert_eq!(config.bcrypt_cost, 4);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let result = Config::from_vars(&vars(&[("ROOM_TTL_SECONDS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_non_numeric_ttl_rejected() {
        let result = Config::from_vars(&vars(&[("STALE_ROOM_SECONDS", "soon")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_log_format() {
        let config = Config::from_vars(&vars(&[("LOG_FORMAT", "json")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        let result = Config::from_vars(&vars(&[("LOG_FORMAT", "xml")]));
        assert!(result.is_err());
    }
}
