// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker session lifecycle.
//!
//! ```text
//!              ConnAck                 SubAck + discovery
//! Disconnected ───────→ Connecting ──────────────────────→ Connected
//!      ↑                    │                                  │
//!      └────────────────────┴──────── connection lost ─────────┘
//! ```
//!
//! [`ConnectionSupervisor`] owns the transitions. Every other component
//! observes the current [`ConnectionState`] through a `watch` channel and
//! publishes only while it allows publishing.
//!
//! On every new session the supervisor subscribes to the command topics
//! and to Home Assistant's status topic, waits for the broker to
//! acknowledge, announces discovery for every zone, releases the state
//! synchronizer and finally marks the bridge online.
//!
//! Nothing in that sequence gives up while the session lives: refused or
//! unacknowledged subscriptions are retried with backoff while the session
//! stays `Connecting`, and zones whose discovery could not be published are
//! retried while the session is `Degraded`.

mod session;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::CommandRouter;
use crate::config::ReconnectionPolicy;
use crate::discovery::DiscoveryPublisher;
use crate::error::{BrokerError, CommandError};
use crate::protocol::{Availability, BrokerLink, OutboundMessage, PAYLOAD_ONLINE};
use crate::state::SyncRequest;
use crate::zone::ZoneRegistry;

pub use session::run_session;

/// Publish attempts per zone before discovery gives up for a session.
const DISCOVERY_ATTEMPTS: u32 = 5;

/// Default time to wait for the broker to acknowledge subscriptions.
const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// State of the broker session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session; waiting to (re)connect.
    #[default]
    Disconnected,
    /// Transport is up; subscriptions and discovery are in progress.
    Connecting,
    /// Session is fully established.
    Connected,
    /// Subscriptions are in place but some zones are not announced yet.
    Degraded(String),
}

impl ConnectionState {
    /// Returns `true` if state and availability may be published, i.e. the
    /// subscriptions of the current session are in place.
    #[must_use]
    pub fn can_publish(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Degraded(reason) => write!(f, "degraded ({reason})"),
        }
    }
}

/// Drives the session state machine from broker events.
///
/// The supervisor is transport agnostic: [`run_session`] feeds it events
/// from a `rumqttc` event loop, tests feed it directly.
pub struct ConnectionSupervisor {
    link: Arc<dyn BrokerLink>,
    registry: Arc<ZoneRegistry>,
    discovery: DiscoveryPublisher,
    router: CommandRouter,
    sync: mpsc::Sender<SyncRequest>,
    policy: ReconnectionPolicy,
    subscribe_timeout: Duration,
    status_topic: String,
    bridge_topic: String,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Arc<AtomicU64>,
    acks: Option<mpsc::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    attempt: u32,
}

impl ConnectionSupervisor {
    /// Creates a supervisor in the `Disconnected` state.
    #[must_use]
    pub fn new(
        link: Arc<dyn BrokerLink>,
        registry: Arc<ZoneRegistry>,
        discovery: DiscoveryPublisher,
        router: CommandRouter,
        sync: mpsc::Sender<SyncRequest>,
    ) -> Self {
        let namer = discovery.namer();
        let status_topic = namer.homeassistant_status_topic();
        let bridge_topic = namer.bridge_availability_topic();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            link,
            registry,
            discovery,
            router,
            sync,
            policy: ReconnectionPolicy::default(),
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            status_topic,
            bridge_topic,
            state: Arc::new(state),
            session: Arc::new(AtomicU64::new(0)),
            acks: None,
            tasks: Vec::new(),
            attempt: 0,
        }
    }

    /// Sets the backoff used for reconnects and discovery retries.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how long to wait for the broker to acknowledge subscriptions.
    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Returns a receiver observing the session state.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Returns every topic filter subscribed to on connect.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        let mut filters = self.router.topics();
        filters.push(self.status_topic.clone());
        filters
    }

    /// Handles a successful connect: starts bootstrapping the session.
    pub fn on_connected(&mut self) {
        self.abort_tasks();
        self.attempt = 0;
        let epoch = self.begin_session(ConnectionState::Connecting);
        tracing::info!(session = epoch, "Connected to broker");

        let (tx, rx) = mpsc::channel(4);
        self.acks = Some(tx);

        let bootstrap = Bootstrap {
            link: Arc::clone(&self.link),
            registry: Arc::clone(&self.registry),
            discovery: self.discovery.clone(),
            policy: self.policy.clone(),
            filters: self.subscriptions(),
            subscribe_timeout: self.subscribe_timeout,
            bridge_topic: self.bridge_topic.clone(),
            state: Arc::clone(&self.state),
            session: Arc::clone(&self.session),
            epoch,
        };
        self.tasks.push(tokio::spawn(bootstrap.run(rx)));
    }

    /// Handles the broker's answer to the subscribe request.
    pub fn on_subscribed(&mut self, accepted: bool) {
        match &self.acks {
            Some(tx) => {
                if tx.try_send(accepted).is_err() {
                    tracing::debug!("Subscription acknowledgement not awaited");
                }
            }
            None => tracing::debug!("Unexpected subscription acknowledgement"),
        }
    }

    /// Handles a lost or refused connection. Returns how long to wait
    /// before the next attempt.
    pub fn on_connection_lost(&mut self, error: &BrokerError) -> Duration {
        self.abort_tasks();
        self.acks = None;
        self.begin_session(ConnectionState::Disconnected);

        let delay = self.policy.jittered_delay(self.attempt);
        tracing::warn!(
            error = %error,
            attempt = self.attempt + 1,
            retry_in = ?delay,
            "Broker connection lost"
        );
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Handles an inbound message.
    ///
    /// Never blocks: commands are validated and queued, Home Assistant
    /// restarts are handled in the background.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        if topic == self.status_topic {
            self.on_homeassistant_status(payload);
            return;
        }

        match self.router.route(topic, payload) {
            Ok(_) => {}
            Err(e @ CommandError::UnknownTopic(_)) => {
                tracing::debug!(error = %e, "Ignoring message");
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Rejected command");
            }
        }
    }

    /// Ends the session for a clean shutdown. Returns the messages to
    /// publish before disconnecting: `offline` for every zone and for the
    /// bridge, or nothing if no session was up.
    pub fn farewell(&mut self) -> Vec<OutboundMessage> {
        self.abort_tasks();
        self.acks = None;
        let was_up = self.state.borrow().can_publish();
        self.begin_session(ConnectionState::Disconnected);
        if !was_up {
            return Vec::new();
        }

        let namer = self.discovery.namer();
        let offline = Availability::Offline.as_str();
        self.registry
            .iter()
            .map(|zone| OutboundMessage::retained(namer.topics_for(zone).availability_topic, offline))
            .chain(std::iter::once(OutboundMessage::retained(
                &self.bridge_topic,
                offline,
            )))
            .collect()
    }

    fn on_homeassistant_status(&mut self, payload: &[u8]) {
        if payload != PAYLOAD_ONLINE.as_bytes() {
            tracing::info!("Home Assistant went offline");
            return;
        }
        if !self.state.borrow().can_publish() {
            tracing::debug!("Home Assistant online before session is ready");
            return;
        }

        tracing::info!("Home Assistant restarted, re-announcing zones");
        let registry = Arc::clone(&self.registry);
        let discovery = self.discovery.clone();
        let policy = self.policy.clone();
        let sync = self.sync.clone();
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(async move {
            discovery
                .announce_all(&registry, &policy, DISCOVERY_ATTEMPTS)
                .await;
            if sync.send(SyncRequest::Resync).await.is_err() {
                tracing::debug!("Synchronizer gone, skipping resync");
            }
        }));
    }

    /// Invalidates the running session and enters `next`.
    fn begin_session(&self, next: ConnectionState) -> u64 {
        let mut epoch = 0;
        self.state.send_modify(|state| {
            epoch = self.session.fetch_add(1, Ordering::SeqCst) + 1;
            if *state != next {
                tracing::debug!(from = %state, to = %next, "Connection state change");
            }
            *state = next;
        });
        epoch
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &*self.state.borrow())
            .field("attempt", &self.attempt)
            .field("zones", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Session setup run in the background after a connect.
struct Bootstrap {
    link: Arc<dyn BrokerLink>,
    registry: Arc<ZoneRegistry>,
    discovery: DiscoveryPublisher,
    policy: ReconnectionPolicy,
    filters: Vec<String>,
    subscribe_timeout: Duration,
    bridge_topic: String,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Arc<AtomicU64>,
    epoch: u64,
}

/// Result of one subscribe attempt.
enum SubscribeOutcome {
    Acknowledged,
    Failed(String),
    /// The session ended while waiting.
    Abandoned,
}

impl Bootstrap {
    async fn run(self, mut acks: mpsc::Receiver<bool>) {
        let mut attempt = 0;
        loop {
            match self.subscribe(&mut acks).await {
                SubscribeOutcome::Acknowledged => break,
                SubscribeOutcome::Abandoned => return,
                SubscribeOutcome::Failed(reason) => {
                    let delay = self.policy.jittered_delay(attempt);
                    tracing::warn!(
                        %reason,
                        attempt = attempt + 1,
                        retry_in = ?delay,
                        "Subscriptions not in place, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
        tracing::debug!(count = self.filters.len(), "Subscriptions acknowledged");

        let mut pending = self
            .discovery
            .announce_each(self.registry.iter(), &self.policy, DISCOVERY_ATTEMPTS)
            .await;
        let next = if pending.is_empty() {
            ConnectionState::Connected
        } else {
            ConnectionState::Degraded(format!("{} zone(s) not announced", pending.len()))
        };
        if !self.transition(next) {
            return;
        }

        let online = OutboundMessage::retained(&self.bridge_topic, Availability::Online.as_str());
        match self.link.publish(online).await {
            Ok(()) => tracing::info!("Bridge online"),
            Err(e) => tracing::warn!(error = %e, "Failed to publish bridge availability"),
        }

        if pending.is_empty() {
            return;
        }
        let mut round = 0;
        while !pending.is_empty() {
            let delay = self.policy.jittered_delay(round);
            tracing::warn!(zones = pending.len(), retry_in = ?delay, "Retrying discovery");
            tokio::time::sleep(delay).await;
            if self.session.load(Ordering::SeqCst) != self.epoch {
                return;
            }
            pending = self
                .discovery
                .announce_each(pending.iter(), &self.policy, DISCOVERY_ATTEMPTS)
                .await;
            round = round.saturating_add(1);
        }
        if self.transition(ConnectionState::Connected) {
            tracing::info!("All zones announced");
        }
    }

    async fn subscribe(&self, acks: &mut mpsc::Receiver<bool>) -> SubscribeOutcome {
        if let Err(e) = self.link.subscribe(self.filters.clone()).await {
            return SubscribeOutcome::Failed(format!("subscribe failed: {e}"));
        }
        match tokio::time::timeout(self.subscribe_timeout, acks.recv()).await {
            Ok(Some(true)) => SubscribeOutcome::Acknowledged,
            Ok(Some(false)) => SubscribeOutcome::Failed("subscriptions refused".to_string()),
            Ok(None) => SubscribeOutcome::Abandoned,
            Err(_) => SubscribeOutcome::Failed("subscriptions not acknowledged".to_string()),
        }
    }

    /// Enters `next` unless this session has been superseded.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if self.session.load(Ordering::SeqCst) != self.epoch {
                return false;
            }
            tracing::debug!(from = %state, to = %next, "Connection state change");
            *state = next.clone();
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandLimits;
    use crate::config::{SyncSettings, ZoneConfig};
    use crate::topic::TopicNamer;
    use crate::zone::DeviceIdentity;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingLink {
        published: Mutex<Vec<OutboundMessage>>,
        subscribed: Mutex<Vec<Vec<String>>>,
        /// Discovery publishes still to be refused.
        failing_configs: Mutex<u32>,
    }

    #[async_trait]
    impl BrokerLink for RecordingLink {
        async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
            if message.topic.ends_with("/config") {
                let mut failing = self.failing_configs.lock();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(BrokerError::Timeout(5000));
                }
            }
            self.published.lock().push(message);
            Ok(())
        }

        async fn subscribe(&self, filters: Vec<String>) -> Result<(), BrokerError> {
            self.subscribed.lock().push(filters);
            Ok(())
        }
    }

    struct Fixture {
        supervisor: ConnectionSupervisor,
        link: Arc<RecordingLink>,
        sync_rx: mpsc::Receiver<SyncRequest>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(
            ZoneRegistry::load(
                "node",
                &[ZoneConfig::new("Office", 1), ZoneConfig::new("Bedroom", 2)],
            )
            .unwrap(),
        );
        let namer = TopicNamer::new(DeviceIdentity::new("node").unwrap());
        let link = Arc::new(RecordingLink::default());
        let discovery = DiscoveryPublisher::new(link.clone(), namer.clone(), &SyncSettings::default());
        let router = CommandRouter::new(&registry, &namer, CommandLimits::default(), HashMap::new());
        let (sync_tx, sync_rx) = mpsc::channel(4);
        let supervisor = ConnectionSupervisor::new(link.clone(), registry, discovery, router, sync_tx)
            .with_policy(
                ReconnectionPolicy::new()
                    .with_initial_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(4)),
            );
        Fixture {
            supervisor,
            link,
            sync_rx,
        }
    }

    fn discovery_count(link: &RecordingLink) -> usize {
        link.published
            .lock()
            .iter()
            .filter(|m| m.topic.ends_with("/config"))
            .count()
    }

    async fn until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn bootstrap_subscribes_announces_then_goes_online() {
        let mut f = fixture();
        let mut state = f.supervisor.connection_state();

        f.supervisor.on_connected();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);
        f.supervisor.on_subscribed(true);

        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        until(|| f.link.published.lock().len() == 3).await;

        let subscribed = f.link.subscribed.lock().clone();
        assert_eq!(subscribed.len(), 1);
        assert_eq!(subscribed[0].len(), 5);
        assert!(subscribed[0].contains(&"homeassistant/status".to_string()));

        let published = f.link.published.lock().clone();
        assert!(published[..2].iter().all(|m| m.topic.ends_with("/config") && m.retain));
        assert_eq!(published[2].topic, "homeassistant/climate/node/availability");
        assert_eq!(published[2].payload, "online");
    }

    #[tokio::test]
    async fn lost_acknowledgement_is_retried_until_subscribed() {
        let mut f = fixture();
        f.supervisor = f.supervisor.with_subscribe_timeout(Duration::from_millis(20));
        let mut state = f.supervisor.connection_state();

        f.supervisor.on_connected();
        until(|| f.link.subscribed.lock().len() >= 3).await;

        // Still not publishable, nothing announced.
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);
        assert!(!state.borrow().can_publish());
        assert!(f.link.published.lock().is_empty());

        f.supervisor.on_subscribed(true);
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        until(|| f.link.published.lock().len() == 3).await;
        assert_eq!(discovery_count(&f.link), 2);
    }

    #[tokio::test]
    async fn refused_subscriptions_are_retried() {
        let mut f = fixture();
        let mut state = f.supervisor.connection_state();

        f.supervisor.on_connected();
        f.supervisor.on_subscribed(false);
        until(|| f.link.subscribed.lock().len() == 2).await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);

        f.supervisor.on_subscribed(true);
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(f.link.subscribed.lock().len(), 2);
    }

    #[tokio::test]
    async fn unannounced_zones_are_retried_while_degraded() {
        let mut f = fixture();
        // Every attempt of the first round for the first zone fails.
        *f.link.failing_configs.lock() = DISCOVERY_ATTEMPTS;
        let mut state = f.supervisor.connection_state();

        f.supervisor.on_connected();
        f.supervisor.on_subscribed(true);
        until(|| f.link.published.lock().len() == 3).await;
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let topics: Vec<String> = f
            .link
            .published
            .lock()
            .iter()
            .map(|m| m.topic.clone())
            .collect();
        // The bridge went online with one zone still pending.
        assert_eq!(
            topics,
            vec![
                "homeassistant/climate/node/bedroom/config",
                "homeassistant/climate/node/availability",
                "homeassistant/climate/node/office/config",
            ]
        );
    }

    #[tokio::test]
    async fn reconnect_announces_exactly_once_per_cycle() {
        let mut f = fixture();
        let mut state = f.supervisor.connection_state();

        for cycle in 1..=3 {
            f.supervisor.on_connected();
            f.supervisor.on_subscribed(true);
            state
                .wait_for(|s| *s == ConnectionState::Connected)
                .await
                .unwrap();
            until(|| f.link.published.lock().len() == cycle * 3).await;
            assert_eq!(discovery_count(&f.link), cycle * 2);

            let delay = f
                .supervisor
                .on_connection_lost(&BrokerError::Connection("reset".to_string()));
            assert!(delay <= Duration::from_millis(4));
            assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
        }
        assert_eq!(f.link.subscribed.lock().len(), 3);
    }

    #[tokio::test]
    async fn lost_connection_cancels_bootstrap() {
        let mut f = fixture();
        let state = f.supervisor.connection_state();

        f.supervisor.on_connected();
        f.supervisor
            .on_connection_lost(&BrokerError::Connection("reset".to_string()));
        // A late acknowledgement for the dead session changes nothing.
        f.supervisor.on_subscribed(true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        assert!(f.link.published.lock().is_empty());
    }

    #[tokio::test]
    async fn homeassistant_birth_reannounces_and_resyncs() {
        let mut f = fixture();
        let mut state = f.supervisor.connection_state();
        f.supervisor.on_connected();
        f.supervisor.on_subscribed(true);
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        until(|| discovery_count(&f.link) == 2).await;

        f.supervisor.on_message("homeassistant/status", b"online");

        assert_eq!(f.sync_rx.recv().await, Some(SyncRequest::Resync));
        assert_eq!(discovery_count(&f.link), 4);
    }

    #[tokio::test]
    async fn farewell_marks_everything_offline() {
        let mut f = fixture();
        let mut state = f.supervisor.connection_state();
        f.supervisor.on_connected();
        f.supervisor.on_subscribed(true);
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let farewell = f.supervisor.farewell();
        let topics: Vec<&str> = farewell.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/climate/node/office/availability",
                "homeassistant/climate/node/bedroom/availability",
                "homeassistant/climate/node/availability",
            ]
        );
        assert!(farewell.iter().all(|m| m.retain && m.payload == "offline"));
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

        // Already down: nothing more to say.
        assert!(f.supervisor.farewell().is_empty());
    }
}
