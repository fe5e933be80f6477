// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Temperature rounding and formatting.

/// Rounds and formats temperatures to a fixed step.
///
/// Both published readings and accepted setpoints go through the same step,
/// so jitter smaller than half a step never produces a new payload.
///
/// # Examples
///
/// ```
/// use rcs_hvac_bridge::types::TemperatureStep;
///
/// let whole = TemperatureStep::new(1.0);
/// assert_eq!(whole.format(71.6), "72");
///
/// let half = TemperatureStep::new(0.5);
/// assert_eq!(half.format(71.6), "71.5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureStep {
    step: f64,
}

impl TemperatureStep {
    /// Smallest step accepted; anything finer is clamped to it.
    const MIN_STEP: f64 = 0.01;

    /// Creates a step. Non-finite or non-positive values fall back to `1.0`.
    #[must_use]
    pub fn new(step: f64) -> Self {
        let step = if step.is_finite() && step > 0.0 {
            step.max(Self::MIN_STEP)
        } else {
            1.0
        };
        Self { step }
    }

    /// Returns the step size.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.step
    }

    /// Rounds a value to the nearest multiple of the step.
    #[must_use]
    pub fn round(&self, value: f64) -> f64 {
        (value / self.step).round() * self.step
    }

    /// Number of decimals needed to print a multiple of the step exactly.
    #[must_use]
    pub fn decimals(&self) -> usize {
        let mut decimals = 0;
        let mut scaled = self.step;
        while decimals < 2 && (scaled - scaled.round()).abs() > 1e-9 {
            scaled *= 10.0;
            decimals += 1;
        }
        decimals
    }

    /// Rounds and renders a value as an MQTT payload.
    #[must_use]
    pub fn format(&self, value: f64) -> String {
        let rounded = self.round(value);
        // -0.0 would otherwise print as "-0"
        let rounded = if rounded.abs() < f64::EPSILON {
            0.0
        } else {
            rounded
        };
        format!("{rounded:.*}", self.decimals())
    }
}

impl Default for TemperatureStep {
    fn default() -> Self {
        Self::new(1.0)
    }
}
