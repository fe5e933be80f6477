// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zone runtime state and its synchronization to MQTT.
//!
//! [`ZoneRuntimeState`] is what the hardware reports for a zone.
//! [`StateSnapshot`] is the rendered form published on the state topics;
//! comparing snapshots decides which topics need a new message.
//!
//! # Examples
//!
//! ```
//! use rcs_hvac_bridge::state::{StateField, StateSnapshot, ZoneRuntimeState};
//! use rcs_hvac_bridge::types::{HvacAction, HvacMode, TemperatureStep};
//!
//! let step = TemperatureStep::new(1.0);
//! let state = ZoneRuntimeState::new(HvacMode::Heat, HvacAction::Heating)
//!     .with_current_temperature(68.4);
//!
//! let snapshot = StateSnapshot::render(&state, step, step);
//! let changes = snapshot.changes_since(&StateSnapshot::default());
//!
//! assert!(changes.contains(&(StateField::CurrentTemperature, "68".to_string())));
//! ```

mod synchronizer;

use crate::topic::TopicSet;
use crate::types::{HvacAction, HvacMode, TemperatureStep};

pub use synchronizer::{StateSynchronizer, SyncRequest};

/// State of a zone as read from the hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRuntimeState {
    /// Operating mode.
    pub mode: HvacMode,
    /// Current activity.
    pub action: HvacAction,
    /// Setpoint, if the controller reports one.
    pub target_temperature: Option<f64>,
    /// Measured temperature, if the zone has a sensor.
    pub current_temperature: Option<f64>,
}

impl ZoneRuntimeState {
    /// Creates a state without temperatures.
    #[must_use]
    pub fn new(mode: HvacMode, action: HvacAction) -> Self {
        Self {
            mode,
            action,
            target_temperature: None,
            current_temperature: None,
        }
    }

    /// Sets the setpoint.
    #[must_use]
    pub fn with_target_temperature(mut self, value: f64) -> Self {
        self.target_temperature = Some(value);
        self
    }

    /// Sets the measured temperature.
    #[must_use]
    pub fn with_current_temperature(mut self, value: f64) -> Self {
        self.current_temperature = Some(value);
        self
    }
}

/// A state value with its own MQTT topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    /// `~/mode`
    Mode,
    /// `~/current_action`
    Action,
    /// `~/current_setpoint`
    TargetTemperature,
    /// `~/current_temperature`
    CurrentTemperature,
}

impl StateField {
    /// All fields, in publish order.
    pub const ALL: [Self; 4] = [
        Self::Mode,
        Self::Action,
        Self::TargetTemperature,
        Self::CurrentTemperature,
    ];

    /// Returns the state topic for this field.
    #[must_use]
    pub fn topic<'a>(&self, topics: &'a TopicSet) -> &'a str {
        match self {
            Self::Mode => &topics.mode_state_topic,
            Self::Action => &topics.action_topic,
            Self::TargetTemperature => &topics.temperature_state_topic,
            Self::CurrentTemperature => &topics.current_temperature_topic,
        }
    }
}

/// Rendered payloads for each state topic.
///
/// Temperatures are rounded before rendering, so two readings that differ
/// by less than half a step produce equal snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    mode: Option<String>,
    action: Option<String>,
    target_temperature: Option<String>,
    current_temperature: Option<String>,
}

impl StateSnapshot {
    /// Renders a state.
    #[must_use]
    pub fn render(
        state: &ZoneRuntimeState,
        setpoint_step: TemperatureStep,
        reading_step: TemperatureStep,
    ) -> Self {
        Self {
            mode: Some(state.mode.as_str().to_string()),
            action: Some(state.action.as_str().to_string()),
            target_temperature: state.target_temperature.map(|t| setpoint_step.format(t)),
            current_temperature: state.current_temperature.map(|t| reading_step.format(t)),
        }
    }

    /// Returns the payload for a field, if known.
    #[must_use]
    pub fn get(&self, field: StateField) -> Option<&str> {
        match field {
            StateField::Mode => self.mode.as_deref(),
            StateField::Action => self.action.as_deref(),
            StateField::TargetTemperature => self.target_temperature.as_deref(),
            StateField::CurrentTemperature => self.current_temperature.as_deref(),
        }
    }

    /// Records a published payload for a field.
    pub fn set(&mut self, field: StateField, payload: String) {
        let slot = match field {
            StateField::Mode => &mut self.mode,
            StateField::Action => &mut self.action,
            StateField::TargetTemperature => &mut self.target_temperature,
            StateField::CurrentTemperature => &mut self.current_temperature,
        };
        *slot = Some(payload);
    }

    /// Lists fields whose payload differs from `previous`.
    ///
    /// Unknown values are never published, so a field that became unknown
    /// is not reported as a change.
    #[must_use]
    pub fn changes_since(&self, previous: &Self) -> Vec<(StateField, String)> {
        StateField::ALL
            .into_iter()
            .filter_map(|field| {
                let current = self.get(field)?;
                (previous.get(field) != Some(current)).then(|| (field, current.to_string()))
            })
            .collect()
    }
}
