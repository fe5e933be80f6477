// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-zone serialization and timeouts for hardware access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::command::ZoneCommand;
use crate::error::HardwareError;
use crate::state::ZoneRuntimeState;
use crate::zone::{Zone, ZoneRegistry};

use super::ZoneHardware;

/// Serializes hardware access per zone and bounds it with a timeout.
///
/// Reads from the poll cycle and applies from command workers for the same
/// zone never overlap. Different zones proceed concurrently, subject to
/// whatever locking the driver itself needs.
///
/// Cheap to clone; clones share the same locks.
#[derive(Clone)]
pub struct HardwareGate {
    hardware: Arc<dyn ZoneHardware>,
    locks: Arc<HashMap<u16, Mutex<()>>>,
    timeout: Duration,
}

impl HardwareGate {
    /// Creates a gate with one lock per registered zone.
    #[must_use]
    pub fn new(hardware: Arc<dyn ZoneHardware>, registry: &ZoneRegistry, timeout: Duration) -> Self {
        let locks = registry
            .iter()
            .map(|zone| (zone.index(), Mutex::new(())))
            .collect();
        Self {
            hardware,
            locks: Arc::new(locks),
            timeout,
        }
    }

    /// Reads a zone's state.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::UnknownZone`] for zones outside the registry,
    /// [`HardwareError::Timeout`] if the read (including waiting for the
    /// zone lock) takes too long, or the driver's own error.
    pub async fn read(&self, zone: &Zone) -> Result<ZoneRuntimeState, HardwareError> {
        let lock = self.lock_for(zone)?;
        self.bounded(async {
            let _guard = lock.lock().await;
            self.hardware.read(zone).await
        })
        .await
    }

    /// Applies a command to a zone.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub async fn apply(&self, zone: &Zone, command: &ZoneCommand) -> Result<(), HardwareError> {
        let lock = self.lock_for(zone)?;
        self.bounded(async {
            let _guard = lock.lock().await;
            self.hardware.apply(zone, command).await
        })
        .await
    }

    fn lock_for(&self, zone: &Zone) -> Result<&Mutex<()>, HardwareError> {
        self.locks
            .get(&zone.index())
            .ok_or(HardwareError::UnknownZone(zone.index()))
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, HardwareError>
    where
        F: Future<Output = Result<T, HardwareError>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| {
                HardwareError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
            })?
    }
}

impl std::fmt::Debug for HardwareGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareGate")
            .field("zones", &self.locks.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::types::{HvacAction, HvacMode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Hardware that records the peak number of concurrent calls per zone.
    #[derive(Default)]
    struct SlowHardware {
        in_flight: AtomicU32,
        peak: AtomicU32,
        delay: Duration,
    }

    impl SlowHardware {
        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ZoneHardware for SlowHardware {
        async fn read(&self, _zone: &Zone) -> Result<ZoneRuntimeState, HardwareError> {
            self.enter().await;
            Ok(ZoneRuntimeState::new(HvacMode::Heat, HvacAction::Idle))
        }

        async fn apply(&self, _zone: &Zone, _command: &ZoneCommand) -> Result<(), HardwareError> {
            self.enter().await;
            Ok(())
        }
    }

    fn registry() -> ZoneRegistry {
        ZoneRegistry::load(
            "node",
            &[ZoneConfig::new("Office", 1), ZoneConfig::new("Bedroom", 2)],
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn same_zone_operations_are_serialized() {
        let registry = registry();
        let hardware = Arc::new(SlowHardware {
            delay: Duration::from_millis(100),
            ..SlowHardware::default()
        });
        let gate = HardwareGate::new(hardware.clone(), &registry, Duration::from_secs(5));
        let zone = registry.get(1).unwrap().clone();

        let read = gate.read(&zone);
        let apply = gate.apply(&zone, &ZoneCommand::SetMode(HvacMode::Off));
        let (read, apply) = tokio::join!(read, apply);

        assert!(read.is_ok());
        assert!(apply.is_ok());
        assert_eq!(hardware.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_zones_run_concurrently() {
        let registry = registry();
        let hardware = Arc::new(SlowHardware {
            delay: Duration::from_millis(100),
            ..SlowHardware::default()
        });
        let gate = HardwareGate::new(hardware.clone(), &registry, Duration::from_secs(5));
        let office = registry.get(1).unwrap().clone();
        let bedroom = registry.get(2).unwrap().clone();

        let (a, b) = tokio::join!(gate.read(&office), gate.read(&bedroom));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(hardware.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operations_time_out() {
        let registry = registry();
        let hardware = Arc::new(SlowHardware {
            delay: Duration::from_secs(10),
            ..SlowHardware::default()
        });
        let gate = HardwareGate::new(hardware, &registry, Duration::from_secs(1));
        let zone = registry.get(1).unwrap().clone();

        let result = gate.read(&zone).await;
        assert!(matches!(result, Err(HardwareError::Timeout(1000))));
    }

    #[tokio::test]
    async fn unknown_zone_is_rejected() {
        let gate = HardwareGate::new(Arc::new(SlowHardware::default()), &registry(), Duration::from_secs(1));
        let result = gate.read(&Zone::new(9, "Attic")).await;
        assert!(matches!(result, Err(HardwareError::UnknownZone(9))));
    }
}
