// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-zone command execution.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::hardware::HardwareGate;
use crate::state::SyncRequest;
use crate::zone::{Zone, ZoneRegistry};

use super::ZoneCommand;

/// Applies one zone's commands in the order they were queued.
///
/// A successful apply asks the synchronizer to re-read the zone so the
/// published state reflects the hardware, not the request. A failed apply
/// publishes nothing.
#[derive(Debug)]
pub struct ZoneWorker {
    zone: Zone,
    gate: HardwareGate,
    commands: mpsc::Receiver<ZoneCommand>,
    sync: mpsc::Sender<SyncRequest>,
}

impl ZoneWorker {
    /// Creates a worker for `zone`.
    #[must_use]
    pub fn new(
        zone: Zone,
        gate: HardwareGate,
        commands: mpsc::Receiver<ZoneCommand>,
        sync: mpsc::Sender<SyncRequest>,
    ) -> Self {
        Self {
            zone,
            gate,
            commands,
            sync,
        }
    }

    /// Runs until every sender of the command queue is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.execute(command).await;
        }
        tracing::debug!(zone = %self.zone, "Command worker stopped");
    }

    async fn execute(&self, command: ZoneCommand) {
        match self.gate.apply(&self.zone, &command).await {
            Ok(()) => {
                tracing::info!(zone = %self.zone, %command, "Command applied");
                if self
                    .sync
                    .send(SyncRequest::Refresh(self.zone.index()))
                    .await
                    .is_err()
                {
                    tracing::debug!(zone = %self.zone, "Synchronizer gone, skipping refresh");
                }
            }
            Err(e) => {
                tracing::warn!(zone = %self.zone, %command, error = %e, "Command failed");
            }
        }
    }
}

/// The set of running zone workers.
#[derive(Debug)]
pub struct ZoneWorkers {
    queues: HashMap<u16, mpsc::Sender<ZoneCommand>>,
    tasks: JoinSet<()>,
}

impl ZoneWorkers {
    /// Spawns one worker per zone, each with a queue of `depth` commands.
    #[must_use]
    pub fn spawn(
        registry: &ZoneRegistry,
        gate: &HardwareGate,
        sync: &mpsc::Sender<SyncRequest>,
        depth: usize,
    ) -> Self {
        let mut queues = HashMap::with_capacity(registry.len());
        let mut tasks = JoinSet::new();
        for zone in registry.iter() {
            let (tx, rx) = mpsc::channel(depth.max(1));
            queues.insert(zone.index(), tx);
            let worker = ZoneWorker::new(zone.clone(), gate.clone(), rx, sync.clone());
            tasks.spawn(worker.run());
        }
        Self { queues, tasks }
    }

    /// Hands out the queue senders, typically to a
    /// [`CommandRouter`](super::CommandRouter).
    ///
    /// Workers exit once every sender is dropped.
    pub fn take_queues(&mut self) -> HashMap<u16, mpsc::Sender<ZoneCommand>> {
        std::mem::take(&mut self.queues)
    }

    /// Waits for workers to drain their queues, aborting any still running
    /// after `grace`.
    pub async fn shutdown(mut self, grace: Duration) {
        self.queues.clear();
        let drained = tokio::time::timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Command workers did not finish in time, aborting"
            );
            self.tasks.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::error::HardwareError;
    use crate::hardware::ZoneHardware;
    use crate::state::ZoneRuntimeState;
    use crate::types::{HvacAction, HvacMode};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingHardware {
        applied: Mutex<Vec<(u16, ZoneCommand)>>,
        fail: bool,
    }

    #[async_trait]
    impl ZoneHardware for RecordingHardware {
        async fn read(&self, _zone: &Zone) -> Result<ZoneRuntimeState, HardwareError> {
            Ok(ZoneRuntimeState::new(HvacMode::Off, HvacAction::Off))
        }

        async fn apply(&self, zone: &Zone, command: &ZoneCommand) -> Result<(), HardwareError> {
            if self.fail {
                return Err(HardwareError::Rejected("busy".to_string()));
            }
            self.applied.lock().push((zone.index(), *command));
            Ok(())
        }
    }

    fn registry() -> ZoneRegistry {
        ZoneRegistry::load("node", &[ZoneConfig::new("Office", 1)]).unwrap()
    }

    #[tokio::test]
    async fn commands_apply_in_order_and_request_refresh() {
        let registry = registry();
        let hardware = Arc::new(RecordingHardware::default());
        let gate = HardwareGate::new(hardware.clone(), &registry, Duration::from_secs(1));
        let (sync_tx, mut sync_rx) = mpsc::channel(8);

        let mut workers = ZoneWorkers::spawn(&registry, &gate, &sync_tx, 4);
        let queues = workers.take_queues();
        let office = &queues[&1];
        office.send(ZoneCommand::SetMode(HvacMode::Heat)).await.unwrap();
        office.send(ZoneCommand::SetTargetTemperature(70.0)).await.unwrap();
        drop(queues);
        workers.shutdown(Duration::from_secs(1)).await;

        assert_eq!(
            *hardware.applied.lock(),
            vec![
                (1, ZoneCommand::SetMode(HvacMode::Heat)),
                (1, ZoneCommand::SetTargetTemperature(70.0)),
            ]
        );
        assert_eq!(sync_rx.try_recv().unwrap(), SyncRequest::Refresh(1));
        assert_eq!(sync_rx.try_recv().unwrap(), SyncRequest::Refresh(1));
    }

    #[tokio::test]
    async fn failed_apply_requests_nothing() {
        let registry = registry();
        let hardware = Arc::new(RecordingHardware {
            fail: true,
            ..RecordingHardware::default()
        });
        let gate = HardwareGate::new(hardware, &registry, Duration::from_secs(1));
        let (sync_tx, mut sync_rx) = mpsc::channel(8);

        let mut workers = ZoneWorkers::spawn(&registry, &gate, &sync_tx, 4);
        let queues = workers.take_queues();
        queues[&1].send(ZoneCommand::SetMode(HvacMode::Cool)).await.unwrap();
        drop(queues);
        workers.shutdown(Duration::from_secs(1)).await;

        assert!(sync_rx.try_recv().is_err());
    }
}
