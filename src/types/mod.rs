// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types exchanged with Home Assistant.
//!
//! - [`HvacMode`] - Operating mode (`off`, `heat`, `cool`, `auto`)
//! - [`HvacAction`] - Current activity reported on the action topic
//! - [`TemperatureStep`] - Rounding and formatting of temperatures

mod mode;
mod temperature;

pub use mode::{HvacAction, HvacMode};
pub use temperature::TemperatureStep;
