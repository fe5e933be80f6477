// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic derivation.
//!
//! Every topic is a pure function of the discovery prefix, the device node
//! id and the zone slug. Discovery messages are retained on the broker, so
//! the derivation must never change: a different topic for the same zone
//! would orphan the old entity in Home Assistant.
//!
//! ```text
//! homeassistant/climate/<device_node_id>/<slug>/config
//!                                              /availability
//!                                              /current_action
//!                                              /set_mode
//!                                              /mode
//!                                              /set_temperature
//!                                              /current_setpoint
//!                                              /current_temperature
//! ```

use crate::zone::{DeviceIdentity, Zone};

/// Default Home Assistant discovery prefix.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Entity component used for every zone.
const COMPONENT: &str = "climate";

const CONFIG_SUFFIX: &str = "/config";
const AVAILABILITY_SUFFIX: &str = "/availability";
const ACTION_SUFFIX: &str = "/current_action";
const MODE_COMMAND_SUFFIX: &str = "/set_mode";
const MODE_STATE_SUFFIX: &str = "/mode";
const TEMPERATURE_COMMAND_SUFFIX: &str = "/set_temperature";
const TEMPERATURE_STATE_SUFFIX: &str = "/current_setpoint";
const CURRENT_TEMPERATURE_SUFFIX: &str = "/current_temperature";

/// The full set of topics for one zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicSet {
    /// Common base, advertised as `~` in the discovery payload.
    pub base: String,
    /// Retained discovery config topic.
    pub discovery_topic: String,
    /// Per-zone availability (`online` / `offline`).
    pub availability_topic: String,
    /// Current action state topic.
    pub action_topic: String,
    /// Inbound mode command topic.
    pub mode_command_topic: String,
    /// Mode state topic.
    pub mode_state_topic: String,
    /// Inbound setpoint command topic.
    pub temperature_command_topic: String,
    /// Setpoint state topic.
    pub temperature_state_topic: String,
    /// Measured temperature state topic.
    pub current_temperature_topic: String,
}

impl TopicSet {
    /// Returns the discovery object id (`{device_node_id}_{slug}`), which is
    /// also the entity's `unique_id`.
    #[must_use]
    pub fn object_id(identity: &DeviceIdentity, zone: &Zone) -> String {
        format!("{}_{}", identity.node_id(), zone.slug())
    }

    /// Returns the inbound command topics.
    #[must_use]
    pub fn command_topics(&self) -> [&str; 2] {
        [&self.mode_command_topic, &self.temperature_command_topic]
    }

    /// Abbreviates a topic of this set relative to `~`.
    ///
    /// Topics outside the set's base are returned unchanged.
    #[must_use]
    pub fn abbreviate(&self, topic: &str) -> String {
        match topic.strip_prefix(&self.base) {
            Some(rest) if rest.starts_with('/') => format!("~{rest}"),
            _ => topic.to_string(),
        }
    }
}

/// Derives topics from the discovery prefix and the device identity.
///
/// # Examples
///
/// ```
/// use rcs_hvac_bridge::topic::TopicNamer;
/// use rcs_hvac_bridge::zone::{DeviceIdentity, Zone};
///
/// let namer = TopicNamer::new(DeviceIdentity::new("montana_rcs_zrc6").unwrap());
/// let topics = namer.topics_for(&Zone::new(3, "Great Room"));
///
/// assert_eq!(
///     topics.discovery_topic,
///     "homeassistant/climate/montana_rcs_zrc6/great_room/config"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamer {
    prefix: String,
    identity: DeviceIdentity,
}

impl TopicNamer {
    /// Creates a namer with the default `homeassistant` prefix.
    #[must_use]
    pub fn new(identity: DeviceIdentity) -> Self {
        Self::with_prefix(DEFAULT_DISCOVERY_PREFIX, identity)
    }

    /// Creates a namer with a custom discovery prefix.
    ///
    /// Trailing slashes are stripped; an empty prefix falls back to the default.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>, identity: DeviceIdentity) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.is_empty() {
            DEFAULT_DISCOVERY_PREFIX.to_string()
        } else {
            trimmed.to_string()
        };
        Self { prefix, identity }
    }

    /// Returns the device identity.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the discovery prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the bridge-wide availability topic, used as the MQTT last will.
    #[must_use]
    pub fn bridge_availability_topic(&self) -> String {
        format!(
            "{}/{COMPONENT}/{}{AVAILABILITY_SUFFIX}",
            self.prefix,
            self.identity.node_id()
        )
    }

    /// Returns the topic Home Assistant publishes its birth message on.
    #[must_use]
    pub fn homeassistant_status_topic(&self) -> String {
        format!("{}/status", self.prefix)
    }

    /// Derives the topic set for a zone.
    #[must_use]
    pub fn topics_for(&self, zone: &Zone) -> TopicSet {
        let base = format!(
            "{}/{COMPONENT}/{}/{}",
            self.prefix,
            self.identity.node_id(),
            zone.slug()
        );
        let topic = |suffix: &str| format!("{base}{suffix}");

        TopicSet {
            discovery_topic: topic(CONFIG_SUFFIX),
            availability_topic: topic(AVAILABILITY_SUFFIX),
            action_topic: topic(ACTION_SUFFIX),
            mode_command_topic: topic(MODE_COMMAND_SUFFIX),
            mode_state_topic: topic(MODE_STATE_SUFFIX),
            temperature_command_topic: topic(TEMPERATURE_COMMAND_SUFFIX),
            temperature_state_topic: topic(TEMPERATURE_STATE_SUFFIX),
            current_temperature_topic: topic(CURRENT_TEMPERATURE_SUFFIX),
            base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namer() -> TopicNamer {
        TopicNamer::new(DeviceIdentity::new("montana_rcs_zrc6").unwrap())
    }

    #[test]
    fn derives_full_topic_set() {
        let topics = namer().topics_for(&Zone::new(1, "Office"));
        let base = "homeassistant/climate/montana_rcs_zrc6/office";
        assert_eq!(topics.base, base);
        assert_eq!(topics.discovery_topic, format!("{base}/config"));
        assert_eq!(topics.availability_topic, format!("{base}/availability"));
        assert_eq!(topics.action_topic, format!("{base}/current_action"));
        assert_eq!(topics.mode_command_topic, format!("{base}/set_mode"));
        assert_eq!(topics.mode_state_topic, format!("{base}/mode"));
        assert_eq!(topics.temperature_command_topic, format!("{base}/set_temperature"));
        assert_eq!(topics.temperature_state_topic, format!("{base}/current_setpoint"));
        assert_eq!(
            topics.current_temperature_topic,
            format!("{base}/current_temperature")
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let zone = Zone::new(3, "Great Room");
        assert_eq!(namer().topics_for(&zone), namer().topics_for(&zone));
    }

    #[test]
    fn distinct_zones_get_distinct_topics() {
        let a = namer().topics_for(&Zone::new(1, "Office"));
        let b = namer().topics_for(&Zone::new(2, "Bedroom"));
        assert_ne!(a.discovery_topic, b.discovery_topic);
        assert_ne!(a.mode_command_topic, b.mode_command_topic);
    }

    #[test]
    fn custom_prefix_is_normalized() {
        let identity = DeviceIdentity::new("node").unwrap();
        let namer = TopicNamer::with_prefix("ha/", identity.clone());
        assert_eq!(namer.prefix(), "ha");
        assert_eq!(namer.bridge_availability_topic(), "ha/climate/node/availability");
        assert_eq!(namer.homeassistant_status_topic(), "ha/status");

        let fallback = TopicNamer::with_prefix("", identity);
        assert_eq!(fallback.prefix(), DEFAULT_DISCOVERY_PREFIX);
    }

    #[test]
    fn object_id_combines_node_and_slug() {
        let identity = DeviceIdentity::new("montana_rcs_zrc6").unwrap();
        let zone = Zone::new(3, "Great Room");
        assert_eq!(TopicSet::object_id(&identity, &zone), "montana_rcs_zrc6_great_room");
    }

    #[test]
    fn abbreviate_relative_to_base() {
        let topics = namer().topics_for(&Zone::new(1, "Office"));
        assert_eq!(topics.abbreviate(&topics.mode_state_topic), "~/mode");
        assert_eq!(topics.abbreviate("other/topic"), "other/topic");
    }
}
