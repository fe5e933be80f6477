// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zone hardware access.
//!
//! The bridge talks to the relay controller only through [`ZoneHardware`].
//! [`HardwareGate`] wraps an implementation so that each zone sees at most
//! one operation at a time and every operation is bounded by a timeout.
//! [`RcsController`] is the driver for RCS ZC6R controllers.

mod gate;
mod rcs;

use async_trait::async_trait;

use crate::command::ZoneCommand;
use crate::error::HardwareError;
use crate::state::ZoneRuntimeState;
use crate::zone::Zone;

pub use gate::HardwareGate;
pub use rcs::RcsController;

/// Read and control access to a multi-zone relay controller.
#[async_trait]
pub trait ZoneHardware: Send + Sync {
    /// Reads the current state of a zone.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the controller cannot be reached or
    /// reports nothing usable for the zone.
    async fn read(&self, zone: &Zone) -> Result<ZoneRuntimeState, HardwareError>;

    /// Applies a command to a zone.
    ///
    /// Returning `Ok` means the controller accepted the change.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the change was not applied.
    async fn apply(&self, zone: &Zone, command: &ZoneCommand) -> Result<(), HardwareError>;
}
