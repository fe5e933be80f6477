// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rumqttc` event loop driver.

use std::time::Duration;

use rumqttc::{ConnectionError, Event, EventLoop, Outgoing, Packet, SubscribeReasonCode};
use tokio::sync::watch;

use crate::error::BrokerError;
use crate::protocol::{BrokerLink, MqttLink};

use super::ConnectionSupervisor;

/// Polls the event loop and feeds the supervisor until `shutdown` flips.
///
/// Reconnects after every connection error, waiting the supervisor's
/// backoff in between. On shutdown, publishes the supervisor's farewell
/// messages and disconnects cleanly, giving up after `grace`.
pub async fn run_session(
    mut event_loop: EventLoop,
    mut supervisor: ConnectionSupervisor,
    link: MqttLink,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) {
    loop {
        let event = tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => supervisor.on_connected(),
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let accepted = ack
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                supervisor.on_subscribed(accepted);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, "Received message");
                supervisor.on_message(&publish.topic, &publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                let delay = supervisor.on_connection_lost(&broker_error(e));
                tokio::select! {
                    () = shutdown_requested(&mut shutdown) => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let farewell = supervisor.farewell();
    if farewell.is_empty() {
        tracing::info!("Broker session closed");
        return;
    }

    let flush = async {
        for message in farewell {
            if let Err(e) = link.publish(message).await {
                tracing::warn!(error = %e, "Failed to publish offline availability");
                break;
            }
        }
        if let Err(e) = link.disconnect().await {
            tracing::debug!(error = %e, "Disconnect request failed");
        }
    };
    let drain = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    if tokio::time::timeout(grace, async { tokio::join!(flush, drain) })
        .await
        .is_err()
    {
        tracing::warn!("Broker session did not close in time");
    } else {
        tracing::info!("Broker session closed");
    }
}

fn broker_error(error: ConnectionError) -> BrokerError {
    match error {
        ConnectionError::ConnectionRefused(code) => BrokerError::Rejected(format!("{code:?}")),
        other => BrokerError::Connection(other.to_string()),
    }
}

/// Resolves once shutdown is requested or its sender is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
