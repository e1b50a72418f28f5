//! Zone manager configuration for development, testing and production
//!
//! Mirrors the preset/builder/validate shape used elsewhere in this crate's
//! ambient stack: a small set of named presets plus a validating builder for
//! anything in between.

#![allow(clippy::missing_errors_doc, clippy::return_self_not_must_use)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    InFlightCapacity, MaxBroadcastHopCount, ResponseTimeoutMs, ZoneDbCheckIntervalSecs, ZoneName,
};

/// Errors raised while building or loading a [`ZoneManagerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// I/O failure while loading or saving configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The zone name itself failed validation.
    #[error("invalid zone name: {0}")]
    InvalidZoneName(String),
}

/// Complete zone manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneManagerConfig {
    /// This agent's dotted zone name.
    pub zone_name: ZoneName,
    /// Capabilities advertised in `info` responses, as `k=v` strings.
    pub zone_capabilities: Vec<String>,
    /// Transport rendezvous identifier for this agent.
    pub zones_topic: String,
    /// Virtual host segment this agent's inbound fabric endpoint expects,
    /// matched against the vhost a neighbour's [`RpcZoneTransport`](crate::fabric::RpcZoneTransport)
    /// encodes from its own connection descriptor.
    pub virtual_host: String,
    /// Seconds between topology cache refreshes.
    pub zone_db_check_interval: ZoneDbCheckIntervalSecs,
    /// Upper bound on broadcast hops before a message is dropped.
    pub zone_max_broadcast_hop_count: MaxBroadcastHopCount,
    /// Bound on how long a `need_response` call waits before timing out.
    pub response_timeout_ms: ResponseTimeoutMs,
    /// Capacity of the in-flight request table.
    pub in_flight_capacity: InFlightCapacity,
    /// Path to the SQLite database backing persisted zone rows.
    pub storage_path: Option<PathBuf>,
    /// Whether to persist zone rows to SQLite, versus an in-memory store.
    pub enable_persistence: bool,
    /// Whether to emit per-message debug-level tracing.
    pub enable_detailed_logs: bool,
    /// Port the HTTP passthrough listens on.
    pub http_port: u16,
}

impl ZoneManagerConfig {
    /// Development configuration: in-memory storage, verbose logging, short
    /// timeouts for fast feedback.
    ///
    /// # Panics
    /// Panics if any hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn development(zone_name: ZoneName) -> Self {
        Self {
            zone_name,
            zone_capabilities: Vec::new(),
            zones_topic: "zones".to_string(),
            virtual_host: "/".to_string(),
            zone_db_check_interval: ZoneDbCheckIntervalSecs::try_new(10).unwrap(),
            zone_max_broadcast_hop_count: MaxBroadcastHopCount::try_new(10).unwrap(),
            response_timeout_ms: ResponseTimeoutMs::try_new(10_000).unwrap(),
            in_flight_capacity: InFlightCapacity::try_new(1_000).unwrap(),
            storage_path: None,
            enable_persistence: false,
            enable_detailed_logs: true,
            http_port: 8080,
        }
    }

    /// Production configuration: persistent storage, sampled logging,
    /// longer timeouts tolerant of real network latency.
    ///
    /// # Panics
    /// Panics if any hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn production(zone_name: ZoneName) -> Self {
        Self {
            zone_name,
            zone_capabilities: Vec::new(),
            zones_topic: "zones".to_string(),
            virtual_host: "/".to_string(),
            zone_db_check_interval: ZoneDbCheckIntervalSecs::try_new(60).unwrap(),
            zone_max_broadcast_hop_count: MaxBroadcastHopCount::try_new(10).unwrap(),
            response_timeout_ms: ResponseTimeoutMs::try_new(30_000).unwrap(),
            in_flight_capacity: InFlightCapacity::try_new(100_000).unwrap(),
            storage_path: Some(PathBuf::from("./data/zones.db")),
            enable_persistence: true,
            enable_detailed_logs: false,
            http_port: 8080,
        }
    }

    /// Configuration suited to in-process integration tests: tiny
    /// timeouts, no persistence.
    ///
    /// # Panics
    /// Panics if any hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn testing(zone_name: ZoneName) -> Self {
        Self {
            zone_name,
            zone_capabilities: Vec::new(),
            zones_topic: "zones".to_string(),
            virtual_host: "/".to_string(),
            zone_db_check_interval: ZoneDbCheckIntervalSecs::try_new(3600).unwrap(),
            zone_max_broadcast_hop_count: MaxBroadcastHopCount::try_new(10).unwrap(),
            response_timeout_ms: ResponseTimeoutMs::try_new(500).unwrap(),
            in_flight_capacity: InFlightCapacity::try_new(100).unwrap(),
            storage_path: None,
            enable_persistence: false,
            enable_detailed_logs: false,
            http_port: 0,
        }
    }

    /// Starts a builder seeded with development defaults.
    ///
    /// # Panics
    /// Panics if `zone_name` is empty.
    #[must_use]
    pub fn builder(zone_name: &str) -> ZoneManagerConfigBuilder {
        ZoneManagerConfigBuilder::new(zone_name)
    }

    /// Validates internal consistency of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones_topic.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "zones_topic".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.enable_persistence && self.storage_path.is_none() {
            return Err(ConfigError::Validation {
                field: "storage_path".to_string(),
                reason: "must be set when persistence is enabled".to_string(),
            });
        }

        for capability in &self.zone_capabilities {
            if !capability.contains('=') {
                return Err(ConfigError::Validation {
                    field: "zone_capabilities".to_string(),
                    reason: format!("expected `k=v`, got `{capability}`"),
                });
            }
        }

        Ok(())
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads and validates configuration from a JSON file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses `zone_capabilities` into a `k=v` map for the `info` surface.
    #[must_use]
    pub fn capabilities_map(&self) -> std::collections::HashMap<String, String> {
        self.zone_capabilities
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Builder for custom zone manager configurations.
pub struct ZoneManagerConfigBuilder {
    config: Result<ZoneManagerConfig, ConfigError>,
}

impl ZoneManagerConfigBuilder {
    fn new(zone_name: &str) -> Self {
        let config = ZoneName::try_new(zone_name.to_string())
            .map(ZoneManagerConfig::development)
            .map_err(|e| ConfigError::InvalidZoneName(e.to_string()));
        Self { config }
    }

    /// Sets the advertised capability list.
    #[must_use]
    pub fn zone_capabilities(mut self, capabilities: Vec<String>) -> Self {
        if let Ok(config) = &mut self.config {
            config.zone_capabilities = capabilities;
        }
        self
    }

    /// Sets the transport rendezvous topic.
    #[must_use]
    pub fn zones_topic(mut self, topic: impl Into<String>) -> Self {
        if let Ok(config) = &mut self.config {
            config.zones_topic = topic.into();
        }
        self
    }

    /// Sets the virtual host segment this agent's inbound fabric endpoint
    /// expects.
    #[must_use]
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        if let Ok(config) = &mut self.config {
            config.virtual_host = virtual_host.into();
        }
        self
    }

    /// Sets the topology refresh interval.
    #[must_use]
    pub fn zone_db_check_interval(mut self, interval: ZoneDbCheckIntervalSecs) -> Self {
        if let Ok(config) = &mut self.config {
            config.zone_db_check_interval = interval;
        }
        self
    }

    /// Sets the broadcast hop-count bound.
    #[must_use]
    pub fn zone_max_broadcast_hop_count(mut self, max_hops: MaxBroadcastHopCount) -> Self {
        if let Ok(config) = &mut self.config {
            config.zone_max_broadcast_hop_count = max_hops;
        }
        self
    }

    /// Sets the response rendezvous timeout.
    #[must_use]
    pub fn response_timeout_ms(mut self, timeout: ResponseTimeoutMs) -> Self {
        if let Ok(config) = &mut self.config {
            config.response_timeout_ms = timeout;
        }
        self
    }

    /// Enables persistence and sets the backing SQLite path.
    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        if let Ok(config) = &mut self.config {
            config.storage_path = Some(path.into());
            config.enable_persistence = true;
        }
        self
    }

    /// Sets the HTTP passthrough port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        if let Ok(config) = &mut self.config {
            config.http_port = port;
        }
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ZoneManagerConfig, ConfigError> {
        let config = self.config?;
        config.validate()?;
        Ok(config)
    }
}
