// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validated zone registry.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::{BridgeConfig, ZoneConfig};
use crate::error::ConfigError;

use super::{DeviceIdentity, Zone};

/// Immutable, validated zone topology.
///
/// Zones are kept ordered by index so that every iteration (discovery,
/// subscriptions, polling) happens in the same order across restarts.
///
/// # Examples
///
/// ```
/// use rcs_hvac_bridge::config::ZoneConfig;
/// use rcs_hvac_bridge::zone::ZoneRegistry;
///
/// let registry = ZoneRegistry::load(
///     "montana_rcs_zrc6",
///     &[ZoneConfig::new("Office", 1), ZoneConfig::new("Great Room", 3)],
/// )
/// .unwrap();
///
/// assert_eq!(registry.len(), 2);
/// assert_eq!(registry.by_slug("great_room").unwrap().index(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRegistry {
    identity: DeviceIdentity,
    zones: BTreeMap<u16, Zone>,
    slugs: HashMap<String, u16>,
}

impl ZoneRegistry {
    /// Validates a zone list and builds the registry.
    ///
    /// # Errors
    ///
    /// Fails on the first offending zone with one of
    /// [`ConfigError::EmptyField`], [`ConfigError::InvalidIndex`],
    /// [`ConfigError::InvalidCharacters`], [`ConfigError::DuplicateIndex`] or
    /// [`ConfigError::DuplicateName`]. No partial registry is ever returned.
    pub fn load(device_node_id: &str, zones: &[ZoneConfig]) -> Result<Self, ConfigError> {
        let identity = DeviceIdentity::new(device_node_id)?;

        if zones.is_empty() {
            return Err(ConfigError::EmptyField {
                field: "zones",
                context: "config".to_string(),
            });
        }

        let mut by_index = BTreeMap::new();
        let mut slugs = HashMap::new();
        let mut folded_names = HashSet::new();

        for (position, entry) in zones.iter().enumerate() {
            let zone = validate_entry(position, entry)?;

            if by_index.contains_key(&zone.index()) {
                return Err(ConfigError::DuplicateIndex {
                    index: i64::from(zone.index()),
                    name: zone.name().to_string(),
                });
            }
            if !folded_names.insert(zone.name().to_lowercase())
                || slugs.contains_key(zone.slug())
            {
                return Err(ConfigError::DuplicateName {
                    name: zone.name().to_string(),
                });
            }

            slugs.insert(zone.slug().to_string(), zone.index());
            by_index.insert(zone.index(), zone);
        }

        tracing::debug!(
            device = %identity,
            zone_count = by_index.len(),
            "Zone registry loaded"
        );

        Ok(Self {
            identity,
            zones: by_index,
            slugs,
        })
    }

    /// Builds the registry from a parsed configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyField`] if `device_node_id` is missing,
    /// otherwise the same errors as [`load`](Self::load).
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let node_id = config
            .device_node_id
            .as_deref()
            .ok_or_else(|| ConfigError::EmptyField {
                field: "device_node_id",
                context: "config".to_string(),
            })?;
        Self::load(node_id, &config.zones)
    }

    /// Returns the device identity.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the zone with the given relay index.
    #[must_use]
    pub fn get(&self, index: u16) -> Option<&Zone> {
        self.zones.get(&index)
    }

    /// Returns the zone with the given slug.
    #[must_use]
    pub fn by_slug(&self, slug: &str) -> Option<&Zone> {
        self.slugs.get(slug).and_then(|index| self.zones.get(index))
    }

    /// Iterates over zones in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    /// Returns the number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns `true` if the registry has no zones. A loaded registry never is.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

fn validate_entry(position: usize, entry: &ZoneConfig) -> Result<Zone, ConfigError> {
    let name = entry
        .name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ConfigError::EmptyField {
            field: "name",
            context: format!("zone #{}", position + 1),
        })?;

    let index = entry.index.ok_or_else(|| ConfigError::EmptyField {
        field: "index",
        context: format!("zone '{name}'"),
    })?;

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return Err(ConfigError::InvalidCharacters {
            name: name.to_string(),
        });
    }

    let index = u16::try_from(index)
        .ok()
        .filter(|index| *index >= 1)
        .ok_or_else(|| ConfigError::InvalidIndex {
            index,
            name: name.to_string(),
        })?;

    Ok(Zone::new(index, name))
}
