// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wiring of the bridge components.
//!
//! ```text
//!                 ┌──────────── ConnectionSupervisor ◄──── rumqttc EventLoop
//!                 │  watch<ConnectionState>   │ on_message
//!                 ▼                           ▼
//! StateSynchronizer ◄── SyncRequest ──  CommandRouter
//!        │                    ▲               │ per-zone queue
//!        │ read               │ Refresh       ▼
//!        └──────────► HardwareGate ◄──── ZoneWorker (apply)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::{CommandLimits, CommandRouter, ZoneWorkers};
use crate::config::BridgeConfig;
use crate::discovery::DiscoveryPublisher;
use crate::error::{ConfigError, Result};
use crate::hardware::{HardwareGate, ZoneHardware};
use crate::protocol::{BrokerLink, MqttSessionBuilder, OutboundMessage};
use crate::state::StateSynchronizer;
use crate::supervisor::{ConnectionState, ConnectionSupervisor, run_session};
use crate::topic::TopicNamer;
use crate::zone::ZoneRegistry;

/// A validated bridge, ready to run.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use rcs_hvac_bridge::{Bridge, BridgeConfig, RcsController};
///
/// # async fn example() -> rcs_hvac_bridge::Result<()> {
/// let config = BridgeConfig::load("config.yaml")?;
/// let port = tokio::fs::OpenOptions::new()
///     .read(true)
///     .write(true)
///     .open("/dev/ttyUSB0")
///     .await
///     .map_err(rcs_hvac_bridge::HardwareError::from)?;
/// let hardware = Arc::new(RcsController::new(port));
///
/// Bridge::new(config, hardware)?
///     .run(async {
///         let _ = tokio::signal::ctrl_c().await;
///     })
///     .await
/// # }
/// ```
pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<ZoneRegistry>,
    namer: TopicNamer,
    hardware: Arc<dyn ZoneHardware>,
}

impl Bridge {
    /// Validates the configuration and creates a bridge.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the zone topology or the temperature unit
    /// is invalid. Nothing is started in that case.
    pub fn new(config: BridgeConfig, hardware: Arc<dyn ZoneHardware>) -> std::result::Result<Self, ConfigError> {
        config.sync.validate()?;
        let registry = ZoneRegistry::from_config(&config)?;
        let namer = TopicNamer::with_prefix(
            config.mqtt.discovery_prefix.clone(),
            registry.identity().clone(),
        );
        Ok(Self {
            config,
            registry: Arc::new(registry),
            namer,
            hardware,
        })
    }

    /// Returns the validated zone registry.
    #[must_use]
    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    /// Returns the topic namer.
    #[must_use]
    pub fn namer(&self) -> &TopicNamer {
        &self.namer
    }

    /// Spawns the synchronizer and zone workers on `link`.
    ///
    /// The returned runtime's supervisor still needs broker events; [`run`]
    /// feeds it from a real MQTT session.
    ///
    /// [`run`]: Self::run
    #[must_use]
    pub fn start(&self, link: Arc<dyn BrokerLink>) -> BridgeRuntime {
        let sync_settings = &self.config.sync;
        let gate = HardwareGate::new(
            Arc::clone(&self.hardware),
            &self.registry,
            sync_settings.hardware_timeout(),
        );

        let (sync_tx, sync_rx) = mpsc::channel(self.registry.len().max(1) * 4);
        let mut workers = ZoneWorkers::spawn(
            &self.registry,
            &gate,
            &sync_tx,
            sync_settings.command_queue_depth(),
        );
        let router = CommandRouter::new(
            &self.registry,
            &self.namer,
            CommandLimits::from_settings(sync_settings),
            workers.take_queues(),
        );

        let discovery = DiscoveryPublisher::new(Arc::clone(&link), self.namer.clone(), sync_settings);
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&link),
            Arc::clone(&self.registry),
            discovery,
            router,
            sync_tx,
        )
        .with_policy(self.config.reconnect.clone());

        let (sync_shutdown, sync_shutdown_rx) = watch::channel(false);
        let synchronizer = StateSynchronizer::new(
            &self.registry,
            &self.namer,
            gate,
            link,
            supervisor.connection_state(),
            sync_settings,
        );
        let synchronizer = tokio::spawn(synchronizer.run(sync_rx, sync_shutdown_rx));

        BridgeRuntime {
            supervisor,
            synchronizer,
            sync_shutdown,
            workers,
            grace: self.config.shutdown_grace(),
        }
    }

    /// Runs the bridge until `shutdown` resolves.
    ///
    /// Broker outages are handled internally with reconnects; this only
    /// returns once shutdown completes.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`](crate::BrokerError) if the MQTT session cannot
    /// be configured.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mqtt = &self.config.mqtt;
        let mut builder = MqttSessionBuilder::default()
            .client_id(mqtt.client_id_for(self.registry.identity().node_id()))
            .host(&mqtt.host)
            .port(mqtt.port)
            .keep_alive(mqtt.keep_alive())
            .operation_timeout(mqtt.operation_timeout())
            .last_will(self.namer.bridge_availability_topic());
        if let Some((username, password)) = mqtt.credentials() {
            builder = builder.credentials(username, password);
        }
        let (link, event_loop) = builder.build()?;

        tracing::info!(
            zones = self.registry.len(),
            node = %self.registry.identity(),
            broker = %format!("{}:{}", mqtt.host, mqtt.port),
            "Starting bridge"
        );

        let BridgeRuntime {
            supervisor,
            synchronizer,
            sync_shutdown,
            workers,
            grace,
        } = self.start(Arc::new(link.clone()));

        let (session_shutdown, session_shutdown_rx) = watch::channel(false);
        let session = tokio::spawn(run_session(
            event_loop,
            supervisor,
            link,
            session_shutdown_rx,
            grace,
        ));

        shutdown.await;
        tracing::info!("Shutting down");

        // Stop publishing state before the farewell so nothing follows the
        // offline messages.
        stop_synchronizer(&sync_shutdown, synchronizer, grace).await;
        session_shutdown.send_replace(true);
        if let Err(e) = session.await {
            tracing::error!(error = %e, "Broker session task failed");
        }
        workers.shutdown(grace).await;

        tracing::info!("Bridge stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .field("namer", &self.namer)
            .finish_non_exhaustive()
    }
}

/// The running background tasks of a bridge.
#[derive(Debug)]
pub struct BridgeRuntime {
    supervisor: ConnectionSupervisor,
    synchronizer: JoinHandle<()>,
    sync_shutdown: watch::Sender<bool>,
    workers: ZoneWorkers,
    grace: Duration,
}

impl BridgeRuntime {
    /// Returns the supervisor, to be fed broker events.
    pub fn supervisor_mut(&mut self) -> &mut ConnectionSupervisor {
        &mut self.supervisor
    }

    /// Returns a receiver observing the session state.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.connection_state()
    }

    /// Stops everything in order and returns the farewell messages the
    /// caller should publish before closing its transport.
    pub async fn shutdown(self) -> Vec<OutboundMessage> {
        let Self {
            mut supervisor,
            synchronizer,
            sync_shutdown,
            workers,
            grace,
        } = self;
        stop_synchronizer(&sync_shutdown, synchronizer, grace).await;
        let farewell = supervisor.farewell();
        drop(supervisor);
        workers.shutdown(grace).await;
        farewell
    }
}

async fn stop_synchronizer(shutdown: &watch::Sender<bool>, mut task: JoinHandle<()>, grace: Duration) {
    shutdown.send_replace(true);
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "State synchronizer task failed"),
        Err(_) => {
            tracing::warn!("State synchronizer did not stop in time, aborting");
            task.abort();
        }
    }
}
