// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge configuration.
//!
//! The configuration file is YAML. Only `device_node_id` and `zones` are
//! required; every other section falls back to defaults.
//!
//! ```yaml
//! device_node_id: montana_rcs_zrc6
//! zones:
//!   - name: Office
//!     index: 1
//!   - name: Great Room
//!     index: 3
//! mqtt:
//!   host: 192.168.1.50
//!   username: bridge
//!   password: secret
//! sync:
//!   poll_interval_secs: 15
//!   failure_threshold: 3
//! reconnect:
//!   max_delay_ms: 30000
//! ```

mod reconnection;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::TemperatureStep;

pub use reconnection::ReconnectionPolicy;

/// Floor for the broker and hardware operation timeouts.
const MIN_IO_TIMEOUT_MS: u64 = 100;

/// Temperature units Home Assistant accepts for a climate entity.
const TEMPERATURE_UNITS: [&str; 2] = ["F", "C"];

/// Top-level bridge configuration as read from the YAML file.
///
/// Fields are kept raw (optional, signed) so that validation in
/// [`ZoneRegistry::load`](crate::zone::ZoneRegistry::load) can report
/// exactly which zone and field is wrong.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Stable device identifier, used as the topic namespace root.
    #[serde(default)]
    pub device_node_id: Option<String>,
    /// The zone topology.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    /// Broker connection settings.
    #[serde(default)]
    pub mqtt: MqttSettings,
    /// Hardware polling and state publishing settings.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectionPolicy,
    /// How long in-flight hardware operations may run after shutdown starts.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl BridgeConfig {
    /// Parses a configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid YAML or does
    /// not match the configuration schema, and
    /// [`ConfigError::InvalidTemperatureUnit`] if the unit is neither `F`
    /// nor `C`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(ConfigError::Parse)?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Returns the shutdown grace period (at least one second).
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs.max(1))
    }
}

/// One zone entry in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneConfig {
    /// Display name; letters, digits and spaces only.
    #[serde(default)]
    pub name: Option<String>,
    /// Relay index on the controller, starting at 1.
    #[serde(default)]
    pub index: Option<i64>,
}

impl ZoneConfig {
    /// Creates a zone entry.
    #[must_use]
    pub fn new(name: impl Into<String>, index: i64) -> Self {
        Self {
            name: Some(name.into()),
            index: Some(index),
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password (only used together with a username).
    pub password: Option<String>,
    /// Client identifier; derived from the device node id when unset.
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Home Assistant discovery prefix.
    pub discovery_prefix: String,
    /// Timeout applied to every publish and subscribe, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl MqttSettings {
    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Returns the per-operation timeout (at least 100 ms).
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(MIN_IO_TIMEOUT_MS))
    }

    /// Returns the configured credentials, if a username is set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or_default()))
    }

    /// Returns the client id, defaulting to `rcs_hvac_{device_node_id}`.
    #[must_use]
    pub fn client_id_for(&self, device_node_id: &str) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("rcs_hvac_{device_node_id}"))
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 30,
            discovery_prefix: "homeassistant".to_string(),
            operation_timeout_ms: 5_000,
        }
    }
}

/// Hardware polling and state publishing settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between hardware polls.
    pub poll_interval_secs: u64,
    /// Consecutive read failures before a zone is reported offline.
    pub failure_threshold: u32,
    /// Display precision advertised to Home Assistant; also the rounding
    /// step for published readings.
    pub precision: f64,
    /// Setpoint step advertised to Home Assistant; also the rounding step
    /// for accepted and published setpoints.
    pub temp_step: f64,
    /// Temperature unit advertised to Home Assistant (`F` or `C`).
    pub temperature_unit: String,
    /// Lowest accepted setpoint.
    pub min_temp: f64,
    /// Highest accepted setpoint.
    pub max_temp: f64,
    /// Timeout for a single hardware read or apply, in milliseconds.
    pub hardware_timeout_ms: u64,
    /// Pending commands buffered per zone.
    pub command_queue_depth: usize,
}

impl SyncSettings {
    /// Checks the fields that cannot be clamped to a sensible value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTemperatureUnit`] if the unit is
    /// neither `F` nor `C`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if TEMPERATURE_UNITS.contains(&self.temperature_unit.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::InvalidTemperatureUnit(
                self.temperature_unit.clone(),
            ))
        }
    }

    /// Returns the poll interval (at least one second).
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Returns the debounce threshold (at least one).
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    /// Returns the hardware I/O timeout (at least 100 ms).
    #[must_use]
    pub fn hardware_timeout(&self) -> Duration {
        Duration::from_millis(self.hardware_timeout_ms.max(MIN_IO_TIMEOUT_MS))
    }

    /// Returns the command queue depth (at least one).
    #[must_use]
    pub fn command_queue_depth(&self) -> usize {
        self.command_queue_depth.max(1)
    }

    /// Rounding step for measured temperatures.
    #[must_use]
    pub fn reading_step(&self) -> TemperatureStep {
        TemperatureStep::new(self.precision)
    }

    /// Rounding step for setpoints.
    #[must_use]
    pub fn setpoint_step(&self) -> TemperatureStep {
        TemperatureStep::new(self.temp_step)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            failure_threshold: 3,
            precision: 1.0,
            temp_step: 1.0,
            temperature_unit: "F".to_string(),
            min_temp: 40.0,
            max_temp: 99.0,
            hardware_timeout_ms: 2_000,
            command_queue_depth: 8,
        }
    }
}

fn default_shutdown_grace_secs() -> u64 {
    5
}
