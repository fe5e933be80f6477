// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the bridge.
//!
//! The hierarchy mirrors how each failure is handled at runtime:
//!
//! - [`ConfigError`]: fatal at startup, a bad topology never runs partially
//! - [`BrokerError`]: recovered by the connection supervisor's reconnect loop
//! - [`HardwareError`]: per zone, debounced into an availability downgrade
//! - [`CommandError`]: malformed inbound message, logged and dropped

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Communication with the MQTT broker failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Communication with the zone controller failed.
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// An inbound command was rejected.
    #[error("command error: {0}")]
    Command(#[from] CommandError),
}

/// Errors raised while loading and validating the zone topology.
///
/// Validation is all-or-nothing: the first offending zone aborts loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two zones share the same relay index.
    #[error("zone '{name}' reuses index {index}")]
    DuplicateIndex {
        /// The duplicated index.
        index: i64,
        /// The name of the second zone using it.
        name: String,
    },

    /// Two zones share a name (compared case-insensitively) or a slug.
    #[error("zone name '{name}' is not unique")]
    DuplicateName {
        /// The offending zone name.
        name: String,
    },

    /// A zone name contains characters outside `[A-Za-z0-9 ]`.
    #[error("zone name '{name}' may only contain letters, digits and spaces")]
    InvalidCharacters {
        /// The offending zone name.
        name: String,
    },

    /// A required field is missing or empty.
    #[error("missing or empty field '{field}' in {context}")]
    EmptyField {
        /// The field name.
        field: &'static str,
        /// Where the field was expected (zone name or `config`).
        context: String,
    },

    /// A zone index is below 1.
    #[error("zone '{name}' has invalid index {index}, indices start at 1")]
    InvalidIndex {
        /// The rejected index.
        index: i64,
        /// The name of the zone.
        name: String,
    },

    /// The device node id cannot be used as an MQTT topic segment.
    #[error("device node id '{0}' is not a valid MQTT topic segment")]
    InvalidDeviceNodeId(String),

    /// The advertised temperature unit is neither `F` nor `C`.
    #[error("temperature unit '{0}' must be F or C")]
    InvalidTemperatureUnit(String),

    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The path that was read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the expected schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors related to the MQTT broker session.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The MQTT client request queue rejected the request.
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The network connection to the broker failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The broker refused the connection.
    #[error("connection rejected by broker: {0}")]
    Rejected(String),

    /// A broker operation did not complete in time.
    #[error("broker operation timed out after {0} ms")]
    Timeout(u64),

    /// A payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors related to the zone controller hardware.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// A read or apply did not complete in time.
    #[error("hardware operation timed out after {0} ms")]
    Timeout(u64),

    /// The transport to the controller failed.
    #[error("hardware I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller sent something that could not be understood.
    #[error("unexpected controller response: {0}")]
    Protocol(String),

    /// The controller has no data for the requested zone.
    #[error("controller reported no data for zone {0}")]
    UnknownZone(u16),

    /// The controller or driver refused the requested change.
    #[error("command rejected: {0}")]
    Rejected(String),
}

/// Errors related to inbound command messages.
///
/// These are never retried: malformed input does not fix itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The mode payload is not one of `off`, `heat`, `cool`, `auto`.
    #[error("invalid mode payload: {0:?}")]
    InvalidMode(String),

    /// The temperature payload is not a number within the allowed range.
    #[error("invalid temperature payload: {0:?}")]
    InvalidTemperature(String),

    /// The message arrived on a topic that maps to no zone command.
    #[error("no command registered for topic {0}")]
    UnknownTopic(String),

    /// The zone's command queue is full.
    #[error("command queue for zone {zone} is full")]
    QueueFull {
        /// The zone slug.
        zone: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_index_names_the_zone() {
        let err = ConfigError::DuplicateIndex {
            index: 2,
            name: "Bedroom".to_string(),
        };
        assert_eq!(err.to_string(), "zone 'Bedroom' reuses index 2");
    }

    #[test]
    fn error_from_config_error() {
        let err: Error = ConfigError::InvalidDeviceNodeId("a/b".to_string()).into();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidDeviceNodeId(_))
        ));
    }

    #[test]
    fn command_error_display() {
        let err = CommandError::InvalidMode("warm".to_string());
        assert_eq!(err.to_string(), "invalid mode payload: \"warm\"");
    }

    #[test]
    fn hardware_timeout_display() {
        assert_eq!(
            HardwareError::Timeout(2000).to_string(),
            "hardware operation timed out after 2000 ms"
        );
    }
}
