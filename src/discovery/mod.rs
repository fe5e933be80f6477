// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Home Assistant MQTT discovery.
//!
//! Each zone is announced as a `climate` entity by a retained JSON payload
//! on its discovery topic. Home Assistant creates the entity from that
//! payload and then talks to the zone only through the topics it lists.
//!
//! # Payload
//!
//! Topics are abbreviated relative to `~`, the zone's base topic:
//!
//! ```text
//! homeassistant/climate/montana_rcs_zrc6/office/config
//! {
//!   "name": "Office",
//!   "unique_id": "montana_rcs_zrc6_office",
//!   "device": { "identifiers": ["montana_rcs_zrc6"], ... },
//!   "~": "homeassistant/climate/montana_rcs_zrc6/office",
//!   "availability": [
//!     { "topic": "homeassistant/climate/montana_rcs_zrc6/availability" },
//!     { "topic": "~/availability" }
//!   ],
//!   "availability_mode": "all",
//!   "modes": ["off", "heat", "cool", "auto"],
//!   "mode_command_topic": "~/set_mode",
//!   ...
//! }
//! ```
//!
//! The field order is fixed, so announcing an unchanged zone twice
//! publishes byte-identical JSON.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{ReconnectionPolicy, SyncSettings};
use crate::error::BrokerError;
use crate::protocol::{BrokerLink, OutboundMessage, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use crate::topic::{TopicNamer, TopicSet};
use crate::types::HvacMode;
use crate::zone::{Zone, ZoneRegistry};

const MANUFACTURER: &str = "RCS";
const MODEL: &str = "ZC6R";
const DEVICE_NAME: &str = "RCS Zone Controller";

/// Device block shared by every zone of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    identifiers: Vec<String>,
    name: &'static str,
    manufacturer: &'static str,
    model: &'static str,
}

/// Identifies the software that published the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginInfo {
    name: &'static str,
    sw_version: &'static str,
}

impl Default for OriginInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            sw_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// One entry of the `availability` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityTopic {
    topic: String,
}

/// Discovery payload for one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPayload {
    name: String,
    unique_id: String,
    device: DeviceInfo,
    origin: OriginInfo,
    #[serde(rename = "~")]
    base: String,
    availability: Vec<AvailabilityTopic>,
    availability_mode: &'static str,
    payload_available: &'static str,
    payload_not_available: &'static str,
    modes: Vec<&'static str>,
    preset_modes: Vec<String>,
    optimistic: bool,
    precision: f64,
    temp_step: f64,
    temperature_unit: String,
    min_temp: f64,
    max_temp: f64,
    action_topic: String,
    mode_command_topic: String,
    mode_state_topic: String,
    temperature_command_topic: String,
    temperature_state_topic: String,
    current_temperature_topic: String,
}

impl DiscoveryPayload {
    /// Returns the entity's unique id.
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Renders the payload as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, BrokerError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Entity settings advertised to Home Assistant.
#[derive(Debug, Clone, PartialEq)]
struct ClimateTraits {
    precision: f64,
    temp_step: f64,
    temperature_unit: String,
    min_temp: f64,
    max_temp: f64,
}

/// Builds and publishes discovery payloads.
#[derive(Clone)]
pub struct DiscoveryPublisher {
    link: Arc<dyn BrokerLink>,
    namer: TopicNamer,
    traits: ClimateTraits,
}

impl DiscoveryPublisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(link: Arc<dyn BrokerLink>, namer: TopicNamer, settings: &SyncSettings) -> Self {
        Self {
            link,
            namer,
            traits: ClimateTraits {
                precision: settings.reading_step().value(),
                temp_step: settings.setpoint_step().value(),
                temperature_unit: settings.temperature_unit.clone(),
                min_temp: settings.min_temp,
                max_temp: settings.max_temp,
            },
        }
    }

    /// Returns the topic namer.
    #[must_use]
    pub fn namer(&self) -> &TopicNamer {
        &self.namer
    }

    /// Builds the discovery payload for a zone.
    #[must_use]
    pub fn payload(&self, zone: &Zone, topics: &TopicSet) -> DiscoveryPayload {
        let identity = self.namer.identity();
        DiscoveryPayload {
            name: zone.name().to_string(),
            unique_id: TopicSet::object_id(identity, zone),
            device: DeviceInfo {
                identifiers: vec![identity.node_id().to_string()],
                name: DEVICE_NAME,
                manufacturer: MANUFACTURER,
                model: MODEL,
            },
            origin: OriginInfo::default(),
            base: topics.base.clone(),
            availability: vec![
                AvailabilityTopic {
                    topic: self.namer.bridge_availability_topic(),
                },
                AvailabilityTopic {
                    topic: topics.abbreviate(&topics.availability_topic),
                },
            ],
            availability_mode: "all",
            payload_available: PAYLOAD_ONLINE,
            payload_not_available: PAYLOAD_OFFLINE,
            modes: HvacMode::ALL.iter().map(HvacMode::as_str).collect(),
            preset_modes: Vec::new(),
            optimistic: false,
            precision: self.traits.precision,
            temp_step: self.traits.temp_step,
            temperature_unit: self.traits.temperature_unit.clone(),
            min_temp: self.traits.min_temp,
            max_temp: self.traits.max_temp,
            action_topic: topics.abbreviate(&topics.action_topic),
            mode_command_topic: topics.abbreviate(&topics.mode_command_topic),
            mode_state_topic: topics.abbreviate(&topics.mode_state_topic),
            temperature_command_topic: topics.abbreviate(&topics.temperature_command_topic),
            temperature_state_topic: topics.abbreviate(&topics.temperature_state_topic),
            current_temperature_topic: topics.abbreviate(&topics.current_temperature_topic),
        }
    }

    /// Publishes the retained discovery payload for a zone.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if the payload cannot be encoded or published.
    pub async fn announce(&self, zone: &Zone, topics: &TopicSet) -> Result<(), BrokerError> {
        let json = self.payload(zone, topics).to_json()?;
        self.link
            .publish(OutboundMessage::retained(&topics.discovery_topic, json))
            .await?;
        tracing::debug!(zone = %zone, topic = %topics.discovery_topic, "Announced zone");
        Ok(())
    }

    /// Announces a zone, retrying failures with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once `attempts` tries have failed.
    pub async fn announce_with_retry(
        &self,
        zone: &Zone,
        policy: &ReconnectionPolicy,
        attempts: u32,
    ) -> Result<(), BrokerError> {
        let topics = self.namer.topics_for(zone);
        let mut attempt = 0;
        loop {
            match self.announce(zone, &topics).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 >= attempts => return Err(e),
                Err(e) => {
                    let delay = policy.jittered_delay(attempt);
                    tracing::warn!(
                        zone = %zone,
                        attempt = attempt + 1,
                        error = %e,
                        retry_in = ?delay,
                        "Discovery publish failed"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Announces every zone. Returns the number of zones that could not be
    /// announced.
    pub async fn announce_all(
        &self,
        registry: &ZoneRegistry,
        policy: &ReconnectionPolicy,
        attempts: u32,
    ) -> usize {
        self.announce_each(registry.iter(), policy, attempts)
            .await
            .len()
    }

    /// Announces the given zones, each with up to `attempts` tries. Returns
    /// the zones that could not be announced.
    pub async fn announce_each<'a>(
        &self,
        zones: impl IntoIterator<Item = &'a Zone>,
        policy: &ReconnectionPolicy,
        attempts: u32,
    ) -> Vec<Zone> {
        let mut announced = 0_usize;
        let mut failed = Vec::new();
        for zone in zones {
            match self.announce_with_retry(zone, policy, attempts).await {
                Ok(()) => announced += 1,
                Err(e) => {
                    tracing::error!(zone = %zone, error = %e, "Giving up on zone discovery for now");
                    failed.push(zone.clone());
                }
            }
        }
        tracing::info!(announced, failed = failed.len(), "Discovery published");
        failed
    }
}

impl std::fmt::Debug for DiscoveryPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryPublisher")
            .field("namer", &self.namer)
            .field("traits", &self.traits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::zone::DeviceIdentity;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Fails the first `failures` publishes, records the rest.
    #[derive(Default)]
    struct FlakyLink {
        failures: Mutex<u32>,
        published: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl BrokerLink for FlakyLink {
        async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(BrokerError::Timeout(5000));
            }
            self.published.lock().push(message);
            Ok(())
        }

        async fn subscribe(&self, _filters: Vec<String>) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn publisher(link: Arc<FlakyLink>) -> DiscoveryPublisher {
        let namer = TopicNamer::new(DeviceIdentity::new("montana_rcs_zrc6").unwrap());
        DiscoveryPublisher::new(link, namer, &SyncSettings::default())
    }

    fn fast_policy() -> ReconnectionPolicy {
        ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[test]
    fn payload_contents() {
        let publisher = publisher(Arc::default());
        let zone = Zone::new(3, "Great Room");
        let topics = publisher.namer.topics_for(&zone);
        let value = serde_json::to_value(publisher.payload(&zone, &topics)).unwrap();

        assert_eq!(value["name"], "Great Room");
        assert_eq!(value["unique_id"], "montana_rcs_zrc6_great_room");
        assert_eq!(value["device"]["identifiers"][0], "montana_rcs_zrc6");
        assert_eq!(value["device"]["manufacturer"], "RCS");
        assert_eq!(value["~"], "homeassistant/climate/montana_rcs_zrc6/great_room");
        assert_eq!(value["modes"], serde_json::json!(["off", "heat", "cool", "auto"]));
        assert_eq!(value["preset_modes"], serde_json::json!([]));
        assert_eq!(value["optimistic"], false);
        assert_eq!(value["precision"], 1.0);
        assert_eq!(value["temp_step"], 1.0);
        assert_eq!(value["mode_command_topic"], "~/set_mode");
        assert_eq!(value["temperature_state_topic"], "~/current_setpoint");
        assert_eq!(value["current_temperature_topic"], "~/current_temperature");
        assert_eq!(value["availability_mode"], "all");
        assert_eq!(
            value["availability"],
            serde_json::json!([
                { "topic": "homeassistant/climate/montana_rcs_zrc6/availability" },
                { "topic": "~/availability" }
            ])
        );
    }

    #[test]
    fn payload_is_byte_identical_across_renders() {
        let publisher = publisher(Arc::default());
        let zone = Zone::new(1, "Office");
        let topics = publisher.namer.topics_for(&zone);
        let a = publisher.payload(&zone, &topics).to_json().unwrap();
        let b = publisher.payload(&zone, &topics).to_json().unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(r#"{"name":"Office","unique_id":"montana_rcs_zrc6_office""#));
    }

    #[tokio::test]
    async fn announce_is_retained() {
        let link = Arc::new(FlakyLink::default());
        let publisher = publisher(link.clone());
        let zone = Zone::new(1, "Office");
        let topics = publisher.namer.topics_for(&zone);

        publisher.announce(&zone, &topics).await.unwrap();

        let published = link.published.lock();
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        assert_eq!(
            published[0].topic,
            "homeassistant/climate/montana_rcs_zrc6/office/config"
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let link = Arc::new(FlakyLink {
            failures: Mutex::new(2),
            ..FlakyLink::default()
        });
        let publisher = publisher(link.clone());

        let result = publisher
            .announce_with_retry(&Zone::new(1, "Office"), &fast_policy(), 5)
            .await;
        assert!(result.is_ok());
        assert_eq!(link.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn announce_all_counts_failures() {
        let link = Arc::new(FlakyLink {
            failures: Mutex::new(2),
            ..FlakyLink::default()
        });
        let publisher = publisher(link.clone());
        let registry = ZoneRegistry::load(
            "montana_rcs_zrc6",
            &[ZoneConfig::new("Office", 1), ZoneConfig::new("Bedroom", 2)],
        )
        .unwrap();

        // One attempt per zone: both initial publishes fail.
        assert_eq!(publisher.announce_all(&registry, &fast_policy(), 1).await, 2);
        assert_eq!(publisher.announce_all(&registry, &fast_policy(), 1).await, 0);
        assert_eq!(link.published.lock().len(), 2);
    }

    #[tokio::test]
    async fn announce_each_returns_zones_left_out() {
        let link = Arc::new(FlakyLink {
            failures: Mutex::new(1),
            ..FlakyLink::default()
        });
        let publisher = publisher(link.clone());
        let zones = [Zone::new(1, "Office"), Zone::new(2, "Bedroom")];

        let failed = publisher.announce_each(&zones, &fast_policy(), 1).await;

        assert_eq!(failed, vec![Zone::new(1, "Office")]);
        assert_eq!(
            link.published.lock()[0].topic,
            "homeassistant/climate/montana_rcs_zrc6/bedroom/config"
        );
    }
}
