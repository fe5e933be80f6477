// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Exponential backoff with full jitter for broker reconnects and
/// discovery publish retries.
///
/// The nominal delay for attempt `n` is `initial_delay * multiplier^n`,
/// capped at `max_delay`. The delay actually slept is drawn uniformly from
/// `[0, nominal]` so a fleet of bridges does not reconnect in lockstep.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rcs_hvac_bridge::config::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::new()
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30));
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert!(policy.jittered_delay(10) <= Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Ceiling for the nominal delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f32,
}

impl ReconnectionPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = duration_to_ms(delay);
        self
    }

    /// Sets the ceiling for the nominal delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_to_ms(delay);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Returns the delay ceiling.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Calculates the nominal (un-jittered) delay for a given attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay().min(self.max_delay());
        }

        let multiplier = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        // Safe: initial delays are seconds, far from f32 precision limits
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay_ms as f32 * multiplier;

        // Non-finite results saturate at the ceiling below
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = if delay_ms.is_finite() {
            Duration::from_millis(delay_ms as u64)
        } else {
            self.max_delay()
        };

        delay.min(self.max_delay())
    }

    /// Draws the delay to actually sleep for an attempt (full jitter).
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let nominal = duration_to_ms(self.delay_for_attempt(attempt));
        if nominal == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=nominal))
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = ReconnectionPolicy::default();
        assert_eq!(policy.initial_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(60));
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_nominal_delay() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2));

        for attempt in 0..20 {
            let nominal = policy.delay_for_attempt(attempt);
            assert!(policy.jittered_delay(attempt) <= nominal);
        }
    }

    #[test]
    fn zero_delay_is_not_jittered() {
        let policy = ReconnectionPolicy::new().with_initial_delay(Duration::ZERO);
        assert_eq!(policy.jittered_delay(0), Duration::ZERO);
        assert_eq!(policy.jittered_delay(5), Duration::ZERO);
    }

    #[test]
    fn deserializes_partial_section() {
        let policy: ReconnectionPolicy = serde_yaml::from_str("max_delay_ms: 5000").unwrap();
        assert_eq!(policy.max_delay(), Duration::from_secs(5));
        assert_eq!(policy.initial_delay(), Duration::from_secs(1));
    }
}
