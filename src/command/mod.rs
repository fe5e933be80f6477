// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound zone commands.
//!
//! Home Assistant writes plain-text payloads to two command topics per zone:
//! the mode topic carries one of `off`, `heat`, `cool`, `auto` and the
//! temperature topic carries a number. This module validates those payloads
//! into [`ZoneCommand`]s; [`CommandRouter`] maps topics to zones and
//! [`ZoneWorker`]s apply the commands in arrival order.
//!
//! # Examples
//!
//! ```
//! use rcs_hvac_bridge::command::{CommandKind, CommandLimits, ZoneCommand};
//! use rcs_hvac_bridge::types::HvacMode;
//!
//! let limits = CommandLimits::default();
//!
//! let cmd = limits.parse(CommandKind::Mode, "heat").unwrap();
//! assert_eq!(cmd, ZoneCommand::SetMode(HvacMode::Heat));
//!
//! assert!(limits.parse(CommandKind::Mode, "warm").is_err());
//! assert!(limits.parse(CommandKind::Temperature, "120").is_err());
//! ```

mod router;
mod worker;

use std::fmt;

use crate::config::SyncSettings;
use crate::error::CommandError;
use crate::types::{HvacMode, TemperatureStep};

pub use router::CommandRouter;
pub use worker::{ZoneWorker, ZoneWorkers};

/// A validated change requested for a zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoneCommand {
    /// Switch the operating mode.
    SetMode(HvacMode),
    /// Change the setpoint. Already rounded and within limits.
    SetTargetTemperature(f64),
}

impl fmt::Display for ZoneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetMode(mode) => write!(f, "set mode {mode}"),
            Self::SetTargetTemperature(t) => write!(f, "set target temperature {t}"),
        }
    }
}

/// Which command topic a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `~/set_mode`
    Mode,
    /// `~/set_temperature`
    Temperature,
}

impl CommandKind {
    /// Error for a payload of this kind that is not valid text.
    fn invalid(self, payload: impl Into<String>) -> CommandError {
        match self {
            Self::Mode => CommandError::InvalidMode(payload.into()),
            Self::Temperature => CommandError::InvalidTemperature(payload.into()),
        }
    }
}

/// Bounds applied to inbound setpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLimits {
    min_temp: f64,
    max_temp: f64,
    step: TemperatureStep,
}

impl CommandLimits {
    /// Creates limits from an inclusive range and a rounding step.
    #[must_use]
    pub fn new(min_temp: f64, max_temp: f64, step: TemperatureStep) -> Self {
        Self {
            min_temp,
            max_temp,
            step,
        }
    }

    /// Limits derived from the sync settings.
    #[must_use]
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(settings.min_temp, settings.max_temp, settings.setpoint_step())
    }

    /// Validates a raw payload.
    ///
    /// Surrounding whitespace is ignored. Mode matching is exact: `Heat` is
    /// rejected just like `warm`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidMode`] or
    /// [`CommandError::InvalidTemperature`] for payloads that do not parse
    /// or fall outside the limits.
    pub fn parse(&self, kind: CommandKind, payload: &str) -> Result<ZoneCommand, CommandError> {
        let payload = payload.trim();
        match kind {
            CommandKind::Mode => payload.parse().map(ZoneCommand::SetMode),
            CommandKind::Temperature => {
                let value: f64 = payload
                    .parse()
                    .map_err(|_| CommandError::InvalidTemperature(payload.to_string()))?;
                if !value.is_finite() || value < self.min_temp || value > self.max_temp {
                    return Err(CommandError::InvalidTemperature(payload.to_string()));
                }
                Ok(ZoneCommand::SetTargetTemperature(self.step.round(value)))
            }
        }
    }

    /// Validates a raw payload given as bytes.
    ///
    /// # Errors
    ///
    /// Same as [`parse`](Self::parse); non-UTF-8 payloads are invalid.
    pub fn parse_bytes(&self, kind: CommandKind, payload: &[u8]) -> Result<ZoneCommand, CommandError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| kind.invalid(String::from_utf8_lossy(payload)))?;
        self.parse(kind, text)
    }
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        let limits = CommandLimits::default();
        for mode in HvacMode::ALL {
            assert_eq!(
                limits.parse(CommandKind::Mode, mode.as_str()),
                Ok(ZoneCommand::SetMode(mode))
            );
        }
    }

    #[test]
    fn mode_payload_is_trimmed() {
        let limits = CommandLimits::default();
        assert_eq!(
            limits.parse(CommandKind::Mode, " cool\n"),
            Ok(ZoneCommand::SetMode(HvacMode::Cool))
        );
    }

    #[test]
    fn reject_unknown_mode() {
        let limits = CommandLimits::default();
        assert_eq!(
            limits.parse(CommandKind::Mode, "warm"),
            Err(CommandError::InvalidMode("warm".to_string()))
        );
        assert!(limits.parse(CommandKind::Mode, "HEAT").is_err());
        assert!(limits.parse(CommandKind::Mode, "").is_err());
    }

    #[test]
    fn temperature_is_rounded_to_step() {
        let limits = CommandLimits::new(40.0, 99.0, TemperatureStep::new(0.5));
        assert_eq!(
            limits.parse(CommandKind::Temperature, "71.3"),
            Ok(ZoneCommand::SetTargetTemperature(71.5))
        );
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        let limits = CommandLimits::default();
        assert!(limits.parse(CommandKind::Temperature, "40").is_ok());
        assert!(limits.parse(CommandKind::Temperature, "99").is_ok());
        assert!(limits.parse(CommandKind::Temperature, "39.9").is_err());
        assert!(limits.parse(CommandKind::Temperature, "99.1").is_err());
    }

    #[test]
    fn reject_non_numeric_temperature() {
        let limits = CommandLimits::default();
        for payload in ["", "warm", "NaN", "inf", "72F"] {
            assert!(
                matches!(
                    limits.parse(CommandKind::Temperature, payload),
                    Err(CommandError::InvalidTemperature(_))
                ),
                "accepted {payload:?}"
            );
        }
    }

    #[test]
    fn non_utf8_payload_is_invalid() {
        let limits = CommandLimits::default();
        assert!(matches!(
            limits.parse_bytes(CommandKind::Mode, &[0xff, 0xfe]),
            Err(CommandError::InvalidMode(_))
        ));
        assert!(matches!(
            limits.parse_bytes(CommandKind::Temperature, &[0xff]),
            Err(CommandError::InvalidTemperature(_))
        ));
    }
}
