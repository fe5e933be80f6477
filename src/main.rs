// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rcs-hvac-bridge`: expose an RCS ZC6R zone controller to Home Assistant.
//!
//! Exits with status 1 if the configuration is invalid or the serial port
//! cannot be opened, and 0 after a graceful shutdown (Ctrl-C or SIGTERM).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rcs_hvac_bridge::{Bridge, BridgeConfig, RcsController};

/// Bridge an RCS multi-zone HVAC controller to Home Assistant over MQTT.
#[derive(Parser, Debug)]
#[command(name = "rcs-hvac-bridge", version, about)]
struct Cli {
    /// Path to the zone configuration file (YAML)
    #[arg(long, env = "CONFIG")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Serial device the controller is attached to, already configured
    /// for 9600 8N1
    #[arg(long, env = "SERIAL")]
    serial: PathBuf,

    /// MQTT broker host (overrides the configuration file)
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port (overrides the configuration file)
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT user name
    #[arg(long, env = "MQTT_USER")]
    mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Discovery prefix all topics live under
    #[arg(long, env = "TOPIC_ROOT")]
    mqtt_topic_root: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut BridgeConfig) {
        let mqtt = &mut config.mqtt;
        if let Some(host) = &self.mqtt_host {
            mqtt.host.clone_from(host);
        }
        if let Some(port) = self.mqtt_port {
            mqtt.port = port;
        }
        if let Some(user) = &self.mqtt_user {
            mqtt.username = Some(user.clone());
        }
        if let Some(password) = &self.mqtt_password {
            mqtt.password = Some(password.clone());
        }
        if let Some(root) = &self.mqtt_topic_root {
            mqtt.discovery_prefix.clone_from(root);
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(format!("rcs_hvac_bridge={level},rumqttc=warn"))
            }),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    cli.apply_overrides(&mut config);
    let setpoint_range = (config.sync.min_temp, config.sync.max_temp);

    let port = match tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cli.serial)
        .await
    {
        Ok(port) => port,
        Err(e) => {
            tracing::error!(path = %cli.serial.display(), error = %e, "Failed to open serial port");
            return ExitCode::FAILURE;
        }
    };
    let controller =
        RcsController::new(port).with_setpoint_range(setpoint_range.0, setpoint_range.1);

    let bridge = match Bridge::new(config, Arc::new(controller)) {
        Ok(bridge) => bridge,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "RCS HVAC bridge");
    match bridge.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Bridge failed");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
