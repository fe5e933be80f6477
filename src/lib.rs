// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RCS HVAC Bridge - expose a multi-zone HVAC controller to Home Assistant.
//!
//! Each zone of an RCS ZC6R controller becomes a Home Assistant `climate`
//! entity through MQTT discovery. The bridge keeps the entity state in sync
//! with the hardware and turns Home Assistant commands into controller
//! commands, surviving broker and hardware outages along the way.
//!
//! # Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`ZoneRegistry`] | Validated, immutable zone topology |
//! | [`TopicNamer`] | Deterministic topic and unique id derivation |
//! | [`DiscoveryPublisher`] | Retained discovery payloads |
//! | [`StateSynchronizer`] | Hardware polling, deduplicated state publishing, availability |
//! | [`CommandRouter`] | Validation and queueing of inbound commands |
//! | [`ConnectionSupervisor`] | Session lifecycle, bootstrap on every (re)connect |
//!
//! # Topics
//!
//! For a zone named `Great Room` on device `montana_rcs_zrc6`:
//!
//! ```text
//! homeassistant/climate/montana_rcs_zrc6/great_room/config               retained discovery
//! homeassistant/climate/montana_rcs_zrc6/great_room/availability         online | offline
//! homeassistant/climate/montana_rcs_zrc6/great_room/mode                 off | heat | cool | auto
//! homeassistant/climate/montana_rcs_zrc6/great_room/set_mode             ← Home Assistant
//! homeassistant/climate/montana_rcs_zrc6/great_room/current_setpoint     e.g. 70
//! homeassistant/climate/montana_rcs_zrc6/great_room/set_temperature      ← Home Assistant
//! homeassistant/climate/montana_rcs_zrc6/great_room/current_temperature  e.g. 68
//! homeassistant/climate/montana_rcs_zrc6/great_room/current_action       heating | idle | ...
//! homeassistant/climate/montana_rcs_zrc6/availability                    bridge last will
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rcs_hvac_bridge::{Bridge, BridgeConfig, RcsController};
//!
//! #[tokio::main]
//! async fn main() -> rcs_hvac_bridge::Result<()> {
//!     let config = BridgeConfig::from_yaml_str(
//!         "device_node_id: montana_rcs_zrc6\nzones:\n  - { name: Office, index: 1 }\n",
//!     )?;
//!     let port = tokio::fs::OpenOptions::new()
//!         .read(true)
//!         .write(true)
//!         .open("/dev/ttyUSB0")
//!         .await
//!         .map_err(rcs_hvac_bridge::HardwareError::from)?;
//!
//!     Bridge::new(config, Arc::new(RcsController::new(port)))?
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! # Custom hardware
//!
//! Anything implementing [`ZoneHardware`] can stand in for the RCS driver,
//! e.g. a simulator in tests.

mod bridge;
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod hardware;
pub mod protocol;
pub mod state;
pub mod supervisor;
pub mod topic;
pub mod types;
pub mod zone;

pub use bridge::{Bridge, BridgeRuntime};
pub use command::{CommandLimits, CommandRouter, ZoneCommand};
pub use config::{BridgeConfig, MqttSettings, ReconnectionPolicy, SyncSettings, ZoneConfig};
pub use discovery::{DiscoveryPayload, DiscoveryPublisher};
pub use error::{BrokerError, CommandError, ConfigError, Error, HardwareError, Result};
pub use hardware::{HardwareGate, RcsController, ZoneHardware};
pub use protocol::{Availability, BrokerLink, MqttLink, MqttSessionBuilder, OutboundMessage};
pub use state::{StateSynchronizer, SyncRequest, ZoneRuntimeState};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use topic::{TopicNamer, TopicSet};
pub use types::{HvacAction, HvacMode, TemperatureStep};
pub use zone::{DeviceIdentity, Zone, ZoneRegistry};
