// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zone topology.
//!
//! A [`ZoneRegistry`] is the validated, immutable set of zones the bridge
//! serves. It is built once from configuration and shared by reference.

mod registry;

use std::fmt;

use crate::error::ConfigError;

pub use registry::ZoneRegistry;

/// One independently controllable HVAC area.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Zone {
    index: u16,
    name: String,
    slug: String,
}

impl Zone {
    /// Creates a zone, deriving its slug from the name.
    ///
    /// This does not validate the name; use [`ZoneRegistry::load`] for that.
    #[must_use]
    pub fn new(index: u16, name: impl Into<String>) -> Self {
        let name = name.into();
        let slug = slugify(&name);
        Self { index, name, slug }
    }

    /// Returns the relay index on the controller (1-based).
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entity slug used in topics and unique ids.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (zone {})", self.name, self.index)
    }
}

/// Normalizes a zone name: spaces become underscores, letters are lowercased.
///
/// # Examples
///
/// ```
/// assert_eq!(rcs_hvac_bridge::zone::slugify("Great Room"), "great_room");
/// ```
#[must_use]
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c == ' ' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

/// The stable identity of the bridged controller.
///
/// Used as the topic namespace root and as the Home Assistant device
/// identifier, so it must never change for a given installation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    node_id: String,
}

impl DeviceIdentity {
    /// Validates and wraps a device node id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyField`] for an empty id and
    /// [`ConfigError::InvalidDeviceNodeId`] if it contains `/`, `#`, `+`,
    /// a null character, or whitespace.
    pub fn new(node_id: impl Into<String>) -> Result<Self, ConfigError> {
        let node_id = node_id.into();
        if node_id.is_empty() {
            return Err(ConfigError::EmptyField {
                field: "device_node_id",
                context: "config".to_string(),
            });
        }
        let illegal = |c: char| matches!(c, '/' | '#' | '+' | '\0') || c.is_whitespace();
        if node_id.chars().any(illegal) {
            return Err(ConfigError::InvalidDeviceNodeId(node_id));
        }
        Ok(Self { node_id })
    }

    /// Returns the node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_replaces_spaces_and_lowercases() {
        assert_eq!(slugify("Office"), "office");
        assert_eq!(slugify("Great Room"), "great_room");
        assert_eq!(slugify("Zone 2B"), "zone_2b");
    }

    #[test]
    fn zone_accessors() {
        let zone = Zone::new(3, "Great Room");
        assert_eq!(zone.index(), 3);
        assert_eq!(zone.name(), "Great Room");
        assert_eq!(zone.slug(), "great_room");
        assert_eq!(zone.to_string(), "Great Room (zone 3)");
    }

    #[test]
    fn device_identity_accepts_topic_safe_ids() {
        let id = DeviceIdentity::new("montana_rcs_zrc6").unwrap();
        assert_eq!(id.node_id(), "montana_rcs_zrc6");
    }

    #[test]
    fn device_identity_rejects_topic_metacharacters() {
        for bad in ["a/b", "a#", "a+b", "nul\0", "has space"] {
            assert!(
                matches!(
                    DeviceIdentity::new(bad),
                    Err(ConfigError::InvalidDeviceNodeId(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn device_identity_rejects_empty() {
        assert!(matches!(
            DeviceIdentity::new(""),
            Err(ConfigError::EmptyField { .. })
        ));
    }
}
