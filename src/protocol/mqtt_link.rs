// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rumqttc`-backed broker link.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use rcs_hvac_bridge::protocol::MqttSessionBuilder;
//!
//! let (link, event_loop) = MqttSessionBuilder::default()
//!     .host("192.168.1.50")
//!     .credentials("user", "password")
//!     .last_will("homeassistant/climate/node/availability")
//!     .keep_alive(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//! ```

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, SubscribeFilter};

use crate::error::BrokerError;

use super::{BrokerLink, OutboundMessage, PAYLOAD_OFFLINE};

/// Default size of the client's outgoing request queue.
const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Session parameters for the broker connection.
#[derive(Debug, Clone)]
struct SessionConfig {
    client_id: String,
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    operation_timeout: Duration,
    last_will_topic: Option<String>,
    request_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: format!("rcs_hvac_{}", std::process::id()),
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(5),
            last_will_topic: None,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

/// Builder for the MQTT session.
///
/// The session always uses a clean session: subscriptions are re-issued on
/// every connect, so nothing depends on broker-side session state.
#[derive(Debug, Default)]
pub struct MqttSessionBuilder {
    config: SessionConfig,
}

impl MqttSessionBuilder {
    /// Sets the client identifier.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the timeout applied to each publish and subscribe (default: 5 seconds).
    #[must_use]
    pub fn operation_timeout(mut self, duration: Duration) -> Self {
        self.config.operation_timeout = duration;
        self
    }

    /// Registers a retained `offline` last will on the given topic.
    #[must_use]
    pub fn last_will(mut self, topic: impl Into<String>) -> Self {
        self.config.last_will_topic = Some(topic.into());
        self
    }

    /// Sets the outgoing request queue size (default: 64).
    #[must_use]
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity.max(1);
        self
    }

    /// Builds the link and its event loop.
    ///
    /// No network I/O happens here; the connection is established when the
    /// event loop is first polled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] if the host is not set.
    pub fn build(self) -> Result<(MqttLink, EventLoop), BrokerError> {
        let config = self.config;
        if config.host.is_empty() {
            return Err(BrokerError::Connection(
                "MQTT broker host is required".to_string(),
            ));
        }

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        if let Some((username, password)) = &config.credentials {
            options.set_credentials(username, password);
        }

        if let Some(topic) = &config.last_will_topic {
            options.set_last_will(LastWill::new(
                topic,
                PAYLOAD_OFFLINE,
                QoS::AtLeastOnce,
                true,
            ));
        }

        let (client, event_loop) = AsyncClient::new(options, config.request_capacity);

        tracing::debug!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "MQTT session configured"
        );

        Ok((
            MqttLink {
                client,
                operation_timeout: config.operation_timeout,
            },
            event_loop,
        ))
    }
}

/// Broker link backed by a `rumqttc` client.
///
/// Cheap to clone; all clones feed the same event loop.
#[derive(Debug, Clone)]
pub struct MqttLink {
    client: AsyncClient,
    operation_timeout: Duration,
}

impl MqttLink {
    /// Requests a clean disconnect.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued in time.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.bounded(self.client.disconnect()).await
    }

    async fn bounded<F>(&self, request: F) -> Result<(), BrokerError>
    where
        F: Future<Output = Result<(), rumqttc::ClientError>>,
    {
        tokio::time::timeout(self.operation_timeout, request)
            .await
            .map_err(|_| BrokerError::Timeout(timeout_ms(self.operation_timeout)))?
            .map_err(BrokerError::Client)
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        tracing::debug!(
            topic = %message.topic,
            payload = %message.payload,
            retain = message.retain,
            "Publishing MQTT message"
        );
        self.bounded(self.client.publish(
            message.topic,
            QoS::AtLeastOnce,
            message.retain,
            message.payload.into_bytes(),
        ))
        .await
    }

    async fn subscribe(&self, filters: Vec<String>) -> Result<(), BrokerError> {
        if filters.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = filters.len(), "Subscribing to MQTT topics");
        let filters = filters
            .into_iter()
            .map(|path| SubscribeFilter::new(path, QoS::AtLeastOnce));
        self.bounded(self.client.subscribe_many(filters)).await
    }
}

fn timeout_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttSessionBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert!(builder.config.last_will_topic.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.operation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_chain() {
        let builder = MqttSessionBuilder::default()
            .client_id("bridge")
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .keep_alive(Duration::from_secs(45))
            .last_will("ha/climate/node/availability")
            .request_capacity(0);

        assert_eq!(builder.config.client_id, "bridge");
        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert!(builder.config.credentials.is_some());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(
            builder.config.last_will_topic.as_deref(),
            Some("ha/climate/node/availability")
        );
        assert_eq!(builder.config.request_capacity, 1);
    }

    #[test]
    fn builder_missing_host_fails() {
        let result = MqttSessionBuilder::default().build();
        assert!(matches!(result, Err(BrokerError::Connection(_))));
    }

    #[tokio::test]
    async fn build_does_not_touch_the_network() {
        let result = MqttSessionBuilder::default()
            .host("127.0.0.1")
            .port(1)
            .build();
        assert!(result.is_ok());
    }
}
