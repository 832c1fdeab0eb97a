//! Configuration management for the sync service.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::engine::SyncSettings;
use crate::runtime::DeadLetterPolicy;
use chrono::{FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable holds a value that has no sensible fallback
    #[error("Invalid value {value:?} for {key}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local store
    pub database: DatabaseConfig,
    /// External reservation system pull API
    pub reservation_api: ReservationApiConfig,
    /// Publish/subscribe bus
    pub bus: BusConfig,
    /// Worker tuning
    pub sync: SyncConfig,
    /// Graceful shutdown timeout in seconds, per worker
    pub shutdown_timeout: u64,
}

/// `SQLite` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Pull API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationApiConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Bearer token
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Which bus implementation to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process bus; for single-node installs and development
    Memory,
    /// Kafka-compatible broker
    Redpanda,
}

impl BusBackend {
    /// Parse `memory` or `redpanda`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "redpanda" | "kafka" => Some(Self::Redpanda),
            _ => None,
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Backend
    pub backend: BusBackend,
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group for the listener
    pub consumer_group: String,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between reconciliation cycles
    pub interval_secs: u64,
    /// Hours of reservation changes to fetch when no cursor exists
    pub changes_lookback_hours: i64,
    /// Minutes past local midnight for the nightly run
    pub nightly_offset_minutes: i64,
    /// Hotel's offset from UTC in minutes
    pub utc_offset_minutes: i32,
    /// This system's `source_system`
    pub system_name: String,
    /// The reservation system's `source_system`
    pub external_system_name: String,
    /// Route inbound notices from the bus to the relay
    pub relay_inbound: bool,
    /// Fate of messages that fail to decode or handle
    pub dead_letter: DeadLetterPolicy,
    /// Seconds before the listener re-subscribes
    pub listener_retry_secs: u64,
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn local_offset_minutes() -> i32 {
    Local::now().offset().local_minus_utc() / 60
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown bus backend or dead-letter
    /// policy, or a UTC offset of a day or more.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its value.
    ///
    /// Unparseable numbers fall back to their defaults.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default_backend = if cfg!(feature = "redpanda") {
            BusBackend::Redpanda
        } else {
            BusBackend::Memory
        };
        let backend = match lookup("BUS_BACKEND") {
            Some(value) => BusBackend::parse(&value).ok_or(ConfigError::Invalid {
                key: "BUS_BACKEND",
                value,
            })?,
            None => default_backend,
        };

        let dead_letter = match lookup("SYNC_DEAD_LETTER") {
            Some(value) => DeadLetterPolicy::parse(&value).ok_or(ConfigError::Invalid {
                key: "SYNC_DEAD_LETTER",
                value,
            })?,
            None => DeadLetterPolicy::Drop,
        };

        let utc_offset_minutes = parse_or(lookup("SYNC_UTC_OFFSET_MINUTES"), local_offset_minutes());
        if utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Invalid {
                key: "SYNC_UTC_OFFSET_MINUTES",
                value: utc_offset_minutes.to_string(),
            });
        }

        Ok(Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL")
                    .unwrap_or_else(|| "sqlite://frontdesk.db?mode=rwc".to_string()),
                max_connections: parse_or(lookup("DATABASE_MAX_CONNECTIONS"), 5),
            },
            reservation_api: ReservationApiConfig {
                base_url: lookup("RESERVATION_API_URL")
                    .unwrap_or_else(|| "http://localhost:8081/api".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key: lookup("RESERVATION_API_KEY").filter(|key| !key.is_empty()),
                timeout_secs: parse_or(lookup("RESERVATION_API_TIMEOUT_SECS"), 30),
            },
            bus: BusConfig {
                backend,
                brokers: lookup("REDPANDA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
                consumer_group: lookup("CONSUMER_GROUP")
                    .unwrap_or_else(|| "frontdesk-sync".to_string()),
            },
            sync: SyncConfig {
                interval_secs: parse_or(lookup("SYNC_INTERVAL_SECS"), 300),
                changes_lookback_hours: parse_or(lookup("SYNC_CHANGES_LOOKBACK_HOURS"), 24),
                nightly_offset_minutes: parse_or(lookup("SYNC_NIGHTLY_OFFSET_MINUTES"), 5),
                utc_offset_minutes,
                system_name: lookup("SYNC_SYSTEM_NAME").unwrap_or_else(|| "reception".to_string()),
                external_system_name: lookup("SYNC_EXTERNAL_SYSTEM_NAME")
                    .unwrap_or_else(|| "reservations".to_string()),
                relay_inbound: parse_or(lookup("SYNC_RELAY_INBOUND"), false),
                dead_letter,
                listener_retry_secs: parse_or(lookup("SYNC_LISTENER_RETRY_SECS"), 5),
            },
            shutdown_timeout: parse_or(lookup("SHUTDOWN_TIMEOUT"), 10),
        })
    }

    /// Worker settings derived from this configuration.
    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            sync_interval: Duration::from_secs(self.sync.interval_secs.max(1)),
            changes_lookback: chrono::Duration::hours(self.sync.changes_lookback_hours.max(0)),
            nightly_offset: chrono::Duration::minutes(self.sync.nightly_offset_minutes),
            utc_offset: FixedOffset::east_opt(self.sync.utc_offset_minutes * 60)
                .unwrap_or_else(|| Utc.fix()),
            system_name: self.sync.system_name.clone(),
            external_system_name: self.sync.external_system_name.clone(),
            relay_inbound: self.sync.relay_inbound,
            dead_letter: self.sync.dead_letter,
            listener_retry: Duration::from_secs(self.sync.listener_retry_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        }
    }

    /// Pull API request timeout.
    #[must_use]
    pub const fn reservation_api_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_api.timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[("SYNC_UTC_OFFSET_MINUTES", "0")]).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.dead_letter, DeadLetterPolicy::Drop);
        assert!(!config.sync.relay_inbound);
        assert_eq!(config.reservation_api.api_key, None);

        let settings = config.sync_settings();
        assert_eq!(settings.sync_interval, Duration::from_secs(300));
        assert_eq!(settings.nightly_offset, chrono::Duration::minutes(5));
        assert_eq!(settings.utc_offset, Utc.fix());
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config(&[("SYNC_INTERVAL_SECS", "soon"), ("SHUTDOWN_TIMEOUT", "-1")]).unwrap();
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.shutdown_timeout, 10);
    }

    #[test]
    fn overrides_are_read() {
        let config = config(&[
            ("RESERVATION_API_URL", "https://pms.example.com/api/"),
            ("RESERVATION_API_KEY", "secret"),
            ("SYNC_DEAD_LETTER", "record"),
            ("SYNC_RELAY_INBOUND", "true"),
            ("SYNC_UTC_OFFSET_MINUTES", "-300"),
            ("BUS_BACKEND", "memory"),
        ])
        .unwrap();

        assert_eq!(config.reservation_api.base_url, "https://pms.example.com/api");
        assert_eq!(config.reservation_api.api_key.as_deref(), Some("secret"));
        assert_eq!(config.sync.dead_letter, DeadLetterPolicy::Record);
        assert!(config.sync.relay_inbound);
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(
            config.sync_settings().utc_offset,
            FixedOffset::west_opt(5 * 3600).unwrap()
        );
    }

    #[test]
    fn unknown_choices_are_errors() {
        assert_eq!(
            config(&[("SYNC_DEAD_LETTER", "retry")]).unwrap_err(),
            ConfigError::Invalid {
                key: "SYNC_DEAD_LETTER",
                value: "retry".to_string()
            }
        );
        assert!(config(&[("BUS_BACKEND", "carrier-pigeon")]).is_err());
        assert!(config(&[("SYNC_UTC_OFFSET_MINUTES", "1440")]).is_err());
    }
}
