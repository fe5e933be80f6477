// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing of inbound command messages to zone queues.
//!
//! ```text
//! homeassistant/climate/node/office/set_mode → "heat"
//!                     ↓
//!           CommandRouter.route()
//!                     ↓
//!     exact lookup → (zone 1, CommandKind::Mode)
//!                     ↓
//!     CommandLimits.parse() → ZoneCommand::SetMode(Heat)
//!                     ↓
//!        zone 1 queue → ZoneWorker → HardwareGate.apply()
//! ```

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::CommandError;
use crate::topic::TopicNamer;
use crate::zone::{Zone, ZoneRegistry};

use super::{CommandKind, CommandLimits, ZoneCommand};

#[derive(Debug)]
struct Route {
    zone: Zone,
    kind: CommandKind,
}

/// Maps command topics to zones and hands validated commands to the
/// zone's worker queue.
///
/// Routing never blocks: a full queue rejects the command instead of
/// stalling the MQTT event loop.
#[derive(Debug)]
pub struct CommandRouter {
    routes: HashMap<String, Route>,
    queues: HashMap<u16, mpsc::Sender<ZoneCommand>>,
    limits: CommandLimits,
}

impl CommandRouter {
    /// Builds the routing table for every zone in the registry.
    ///
    /// `queues` holds the sending side of each zone's command queue; zones
    /// without a queue reject their commands with
    /// [`CommandError::QueueFull`].
    #[must_use]
    pub fn new(
        registry: &ZoneRegistry,
        namer: &TopicNamer,
        limits: CommandLimits,
        queues: HashMap<u16, mpsc::Sender<ZoneCommand>>,
    ) -> Self {
        let mut routes = HashMap::new();
        for zone in registry.iter() {
            let topics = namer.topics_for(zone);
            routes.insert(
                topics.mode_command_topic,
                Route {
                    zone: zone.clone(),
                    kind: CommandKind::Mode,
                },
            );
            routes.insert(
                topics.temperature_command_topic,
                Route {
                    zone: zone.clone(),
                    kind: CommandKind::Temperature,
                },
            );
        }
        Self {
            routes,
            queues,
            limits,
        }
    }

    /// Returns every command topic, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Returns `true` if `topic` is a command topic.
    #[must_use]
    pub fn handles(&self, topic: &str) -> bool {
        self.routes.contains_key(topic)
    }

    /// Validates a message and queues the resulting command.
    ///
    /// Returns the zone the command was queued for.
    ///
    /// # Errors
    ///
    /// - [`CommandError::UnknownTopic`] if the topic matches no zone
    /// - [`CommandError::InvalidMode`] / [`CommandError::InvalidTemperature`]
    ///   if the payload does not validate; nothing is queued
    /// - [`CommandError::QueueFull`] if the zone already has too many
    ///   pending commands
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<&Zone, CommandError> {
        let route = self
            .routes
            .get(topic)
            .ok_or_else(|| CommandError::UnknownTopic(topic.to_string()))?;

        let command = self.limits.parse_bytes(route.kind, payload)?;

        let queue_full = || CommandError::QueueFull {
            zone: route.zone.slug().to_string(),
        };
        let queue = self.queues.get(&route.zone.index()).ok_or_else(queue_full)?;
        match queue.try_send(command) {
            Ok(()) => {
                tracing::debug!(zone = %route.zone, %command, "Command queued");
                Ok(&route.zone)
            }
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => Err(queue_full()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::types::HvacMode;
    use crate::zone::DeviceIdentity;

    struct Fixture {
        router: CommandRouter,
        office: mpsc::Receiver<ZoneCommand>,
        _bedroom: mpsc::Receiver<ZoneCommand>,
        namer: TopicNamer,
        registry: ZoneRegistry,
    }

    fn fixture(depth: usize) -> Fixture {
        let registry = ZoneRegistry::load(
            "node",
            &[ZoneConfig::new("Office", 1), ZoneConfig::new("Bedroom", 2)],
        )
        .unwrap();
        let namer = TopicNamer::new(DeviceIdentity::new("node").unwrap());
        let (office_tx, office) = mpsc::channel(depth);
        let (bedroom_tx, bedroom) = mpsc::channel(depth);
        let queues = HashMap::from([(1, office_tx), (2, bedroom_tx)]);
        let router = CommandRouter::new(&registry, &namer, CommandLimits::default(), queues);
        Fixture {
            router,
            office,
            _bedroom: bedroom,
            namer,
            registry,
        }
    }

    fn office_topics(f: &Fixture) -> crate::topic::TopicSet {
        f.namer.topics_for(f.registry.get(1).unwrap())
    }

    #[test]
    fn valid_mode_is_queued_for_its_zone() {
        let mut f = fixture(4);
        let topic = office_topics(&f).mode_command_topic;

        let zone = f.router.route(&topic, b"heat").unwrap();
        assert_eq!(zone.index(), 1);
        assert_eq!(f.office.try_recv().unwrap(), ZoneCommand::SetMode(HvacMode::Heat));
    }

    #[test]
    fn invalid_payload_is_not_queued() {
        let mut f = fixture(4);
        let topic = office_topics(&f).mode_command_topic;

        assert_eq!(
            f.router.route(&topic, b"warm"),
            Err(CommandError::InvalidMode("warm".to_string()))
        );
        assert!(f.office.try_recv().is_err());
    }

    #[test]
    fn out_of_range_temperature_is_not_queued() {
        let mut f = fixture(4);
        let topic = office_topics(&f).temperature_command_topic;

        assert!(matches!(
            f.router.route(&topic, b"150"),
            Err(CommandError::InvalidTemperature(_))
        ));
        assert!(f.office.try_recv().is_err());
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let f = fixture(4);
        assert!(matches!(
            f.router.route("homeassistant/climate/node/node_attic/set_mode", b"heat"),
            Err(CommandError::UnknownTopic(_))
        ));
        // State topics are not command topics.
        let state_topic = office_topics(&f).mode_state_topic;
        assert!(!f.router.handles(&state_topic));
    }

    #[test]
    fn full_queue_rejects_instead_of_blocking() {
        let mut f = fixture(1);
        let topic = office_topics(&f).temperature_command_topic;

        assert!(f.router.route(&topic, b"70").is_ok());
        assert_eq!(
            f.router.route(&topic, b"71"),
            Err(CommandError::QueueFull {
                zone: "office".to_string()
            })
        );
        assert_eq!(
            f.office.try_recv().unwrap(),
            ZoneCommand::SetTargetTemperature(70.0)
        );
    }

    #[test]
    fn topics_cover_both_commands_for_every_zone() {
        let f = fixture(1);
        let topics = f.router.topics();
        assert_eq!(topics.len(), 4);
        assert!(topics.iter().all(|t| t.ends_with("/set_mode") || t.ends_with("/set_temperature")));
    }
}
