// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware polling and state publishing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::SyncSettings;
use crate::error::HardwareError;
use crate::hardware::HardwareGate;
use crate::protocol::{Availability, BrokerLink, OutboundMessage};
use crate::supervisor::ConnectionState;
use crate::topic::{TopicNamer, TopicSet};
use crate::types::TemperatureStep;
use crate::zone::{Zone, ZoneRegistry};

use super::{StateField, StateSnapshot, ZoneRuntimeState};

/// Out-of-cycle work for the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Re-read one zone now, e.g. after a command was applied.
    Refresh(u16),
    /// Forget what was published and republish everything on the next
    /// read, e.g. after Home Assistant restarted.
    Resync,
}

/// Everything the synchronizer knows about one zone.
#[derive(Debug)]
struct ZoneTracker {
    zone: Zone,
    topics: TopicSet,
    state: Option<ZoneRuntimeState>,
    published: StateSnapshot,
    consecutive_failures: u32,
    availability: Option<Availability>,
    published_availability: Option<Availability>,
}

impl ZoneTracker {
    fn new(zone: Zone, topics: TopicSet) -> Self {
        Self {
            zone,
            topics,
            state: None,
            published: StateSnapshot::default(),
            consecutive_failures: 0,
            availability: None,
            published_availability: None,
        }
    }

    fn record(&mut self, result: Result<ZoneRuntimeState, HardwareError>, threshold: u32) {
        match result {
            Ok(state) => {
                if self.availability == Some(Availability::Offline) {
                    tracing::info!(zone = %self.zone, "Zone reachable again");
                }
                self.consecutive_failures = 0;
                self.availability = Some(Availability::Online);
                self.state = Some(state);
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                tracing::warn!(
                    zone = %self.zone,
                    failures = self.consecutive_failures,
                    error = %e,
                    "Zone read failed"
                );
                if self.consecutive_failures >= threshold
                    && self.availability != Some(Availability::Offline)
                {
                    tracing::warn!(zone = %self.zone, "Marking zone offline");
                    self.availability = Some(Availability::Offline);
                }
            }
        }
    }

    fn forget_published(&mut self) {
        self.published = StateSnapshot::default();
        self.published_availability = None;
    }
}

/// The single writer of zone state and zone availability topics.
///
/// Reads every zone on a fixed interval, publishes only what changed since
/// the last successful publish, and debounces read failures: a zone goes
/// offline only after `failure_threshold` consecutive failures and comes
/// back online on the first good read.
///
/// Nothing is published unless the broker session is ready. When it
/// becomes ready (again), everything is republished.
pub struct StateSynchronizer {
    gate: HardwareGate,
    link: Arc<dyn BrokerLink>,
    connection: watch::Receiver<ConnectionState>,
    trackers: BTreeMap<u16, ZoneTracker>,
    setpoint_step: TemperatureStep,
    reading_step: TemperatureStep,
    failure_threshold: u32,
    poll_interval: Duration,
}

impl StateSynchronizer {
    /// Creates a synchronizer for every zone in the registry.
    #[must_use]
    pub fn new(
        registry: &ZoneRegistry,
        namer: &TopicNamer,
        gate: HardwareGate,
        link: Arc<dyn BrokerLink>,
        connection: watch::Receiver<ConnectionState>,
        settings: &SyncSettings,
    ) -> Self {
        let trackers = registry
            .iter()
            .map(|zone| {
                let tracker = ZoneTracker::new(zone.clone(), namer.topics_for(zone));
                (zone.index(), tracker)
            })
            .collect();
        Self {
            gate,
            link,
            connection,
            trackers,
            setpoint_step: settings.setpoint_step(),
            reading_step: settings.reading_step(),
            failure_threshold: settings.failure_threshold(),
            poll_interval: settings.poll_interval(),
        }
    }

    /// Returns the availability verdict for a zone, if one was reached.
    #[must_use]
    pub fn availability(&self, index: u16) -> Option<Availability> {
        self.trackers.get(&index).and_then(|t| t.availability)
    }

    /// Returns the consecutive read failures for a zone.
    #[must_use]
    pub fn consecutive_failures(&self, index: u16) -> u32 {
        self.trackers
            .get(&index)
            .map_or(0, |t| t.consecutive_failures)
    }

    /// Returns the last state read for a zone.
    #[must_use]
    pub fn state(&self, index: u16) -> Option<&ZoneRuntimeState> {
        self.trackers.get(&index).and_then(|t| t.state.as_ref())
    }

    /// Reads every zone concurrently and publishes the changes.
    pub async fn poll(&mut self) {
        let mut reads = JoinSet::new();
        for tracker in self.trackers.values() {
            let gate = self.gate.clone();
            let zone = tracker.zone.clone();
            reads.spawn(async move {
                let result = gate.read(&zone).await;
                (zone.index(), result)
            });
        }

        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((index, result)) => self.record(index, result),
                Err(e) => tracing::error!(error = %e, "Zone read task failed"),
            }
        }

        let indices: Vec<u16> = self.trackers.keys().copied().collect();
        for index in indices {
            self.publish_zone(index).await;
        }
    }

    /// Reads one zone and publishes the changes.
    pub async fn refresh(&mut self, index: u16) {
        let Some(zone) = self.trackers.get(&index).map(|t| t.zone.clone()) else {
            tracing::debug!(zone = index, "Refresh requested for unknown zone");
            return;
        };
        let result = self.gate.read(&zone).await;
        self.record(index, result);
        self.publish_zone(index).await;
    }

    /// Forgets everything published and polls again, so every known value
    /// is republished.
    pub async fn resync(&mut self) {
        for tracker in self.trackers.values_mut() {
            tracker.forget_published();
        }
        self.poll().await;
    }

    /// Runs the poll loop until `shutdown` flips to `true` or its sender is
    /// dropped.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<SyncRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if *shutdown.borrow() {
            return;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut publishable = self.connection.borrow().can_publish();

        tracing::info!(
            zones = self.trackers.len(),
            interval = ?self.poll_interval,
            "State synchronizer started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.poll().await,
                request = requests.recv() => match request {
                    Some(SyncRequest::Refresh(index)) => self.refresh(index).await,
                    Some(SyncRequest::Resync) => {
                        tracing::info!("Resynchronizing all zones");
                        self.resync().await;
                    }
                    None => break,
                },
                changed = self.connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now = self.connection.borrow_and_update().can_publish();
                    if now && !publishable {
                        tracing::info!("Broker session ready, republishing state");
                        self.resync().await;
                    }
                    publishable = now;
                }
            }
        }

        tracing::info!("State synchronizer stopped");
    }

    fn record(&mut self, index: u16, result: Result<ZoneRuntimeState, HardwareError>) {
        let threshold = self.failure_threshold;
        if let Some(tracker) = self.trackers.get_mut(&index) {
            tracker.record(result, threshold);
        }
    }

    async fn publish_zone(&mut self, index: u16) {
        if !self.connection.borrow().can_publish() {
            return;
        }
        let Some(tracker) = self.trackers.get_mut(&index) else {
            return;
        };

        if let Some(availability) = tracker.availability
            && tracker.published_availability != Some(availability)
        {
            let message =
                OutboundMessage::retained(&tracker.topics.availability_topic, availability.as_str());
            if let Err(e) = self.link.publish(message).await {
                tracing::warn!(zone = %tracker.zone, error = %e, "Failed to publish availability");
                return;
            }
            tracing::debug!(zone = %tracker.zone, %availability, "Published availability");
            tracker.published_availability = Some(availability);
        }

        if tracker.availability != Some(Availability::Online) {
            return;
        }
        let Some(state) = tracker.state.as_ref() else {
            return;
        };

        let snapshot = StateSnapshot::render(state, self.setpoint_step, self.reading_step);
        for (field, payload) in snapshot.changes_since(&tracker.published) {
            let topic = field.topic(&tracker.topics);
            let message = OutboundMessage::transient(topic, payload.clone());
            if let Err(e) = self.link.publish(message).await {
                // Unpublished fields stay pending and go out on the next read.
                tracing::warn!(zone = %tracker.zone, ?field, error = %e, "Failed to publish state");
                return;
            }
            tracing::trace!(zone = %tracker.zone, ?field, %payload, "Published state");
            tracker.published.set(field, payload);
        }
    }
}

impl std::fmt::Debug for StateSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSynchronizer")
            .field("zones", &self.trackers.len())
            .field("failure_threshold", &self.failure_threshold)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
