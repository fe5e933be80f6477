// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker-facing protocol layer.
//!
//! Every component that talks to the broker does so through the
//! [`BrokerLink`] trait. [`MqttLink`] implements it on top of a `rumqttc`
//! client; tests substitute an in-memory recorder.
//!
//! All messages are sent with QoS 1 (at least once).

mod mqtt_link;

use std::fmt;

use async_trait::async_trait;

use crate::error::BrokerError;

pub use mqtt_link::{MqttLink, MqttSessionBuilder};

/// Payload announcing that an entity is available.
pub const PAYLOAD_ONLINE: &str = "online";

/// Payload announcing that an entity is unavailable.
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Availability of the bridge or of a single zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Availability {
    /// Reachable and reporting.
    Online,
    /// Unreachable or shut down.
    Offline,
}

impl Availability {
    /// Returns the MQTT payload.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => PAYLOAD_ONLINE,
            Self::Offline => PAYLOAD_OFFLINE,
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// UTF-8 payload.
    pub payload: String,
    /// Whether the broker should retain the message.
    pub retain: bool,
}

impl OutboundMessage {
    /// Creates a retained message.
    #[must_use]
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }

    /// Creates a non-retained message.
    #[must_use]
    pub fn transient(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// A publish/subscribe channel to the broker.
///
/// Implementations must bound every call with a timeout; none may block
/// indefinitely.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Publishes a message with QoS 1.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if the message could not be handed to the broker.
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Subscribes to a set of topic filters with QoS 1.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if the subscription request could not be sent.
    async fn subscribe(&self, filters: Vec<String>) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_payloads() {
        assert_eq!(Availability::Online.as_str(), "online");
        assert_eq!(Availability::Offline.to_string(), "offline");
    }

    #[test]
    fn message_constructors_set_retain() {
        assert!(OutboundMessage::retained("a", "b").retain);
        assert!(!OutboundMessage::transient("a", "b").retain);
    }
}
