// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HVAC mode and action types.
//!
//! The string forms are the payloads Home Assistant's MQTT climate platform
//! exchanges on the mode and action topics.

use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

/// Operating mode of a zone.
///
/// # Examples
///
/// ```
/// use rcs_hvac_bridge::types::HvacMode;
///
/// let mode: HvacMode = "heat".parse().unwrap();
/// assert_eq!(mode, HvacMode::Heat);
/// assert!("warm".parse::<HvacMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacMode {
    /// Zone is switched off.
    Off,
    /// Zone heats to the setpoint.
    Heat,
    /// Zone cools to the setpoint.
    Cool,
    /// Controller picks heating or cooling.
    Auto,
}

impl HvacMode {
    /// All modes, in the order advertised to Home Assistant.
    pub const ALL: [Self; 4] = [Self::Off, Self::Heat, Self::Cool, Self::Auto];

    /// Returns the MQTT payload representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = CommandError;

    /// Parses a mode payload. Matching is exact: Home Assistant only ever
    /// sends the lowercase names it was given in the discovery payload.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "auto" => Ok(Self::Auto),
            _ => Err(CommandError::InvalidMode(s.to_string())),
        }
    }
}

/// What a zone is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacAction {
    /// Zone is off.
    Off,
    /// Zone is calling for heat.
    Heating,
    /// Zone is calling for cooling.
    Cooling,
    /// Zone is dehumidifying.
    Drying,
    /// Zone is on but satisfied.
    Idle,
    /// Only the fan is running for this zone.
    Fan,
}

impl HvacAction {
    /// Returns the MQTT payload representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Drying => "drying",
            Self::Idle => "idle",
            Self::Fan => "fan",
        }
    }
}

impl fmt::Display for HvacAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_payload() {
        for mode in HvacMode::ALL {
            assert_eq!(mode.as_str().parse::<HvacMode>().unwrap(), mode);
        }
    }

    #[test]
    fn mode_rejects_unknown_and_wrong_case() {
        assert_eq!(
            "warm".parse::<HvacMode>(),
            Err(CommandError::InvalidMode("warm".to_string()))
        );
        assert!("HEAT".parse::<HvacMode>().is_err());
        assert!("".parse::<HvacMode>().is_err());
    }

    #[test]
    fn action_payloads() {
        assert_eq!(HvacAction::Heating.as_str(), "heating");
        assert_eq!(HvacAction::Idle.to_string(), "idle");
        assert_eq!(HvacAction::Fan.as_str(), "fan");
    }
}
