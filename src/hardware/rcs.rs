// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for RCS ZC6R zone controllers (serial protocol 3.7).
//!
//! # Protocol
//!
//! Requests and responses are ASCII lines terminated by `\r`, made of
//! space separated `KEY=VALUE` tokens. The driver uses two status queries
//! and two commands:
//!
//! ```text
//! → A=1 R=1
//! ← A=1 O=00 Z=1 T=72 SP=70 M=H FM=0 Z=2 T=68 SP=65 M=O FM=0
//! → A=1 R=2
//! ← A=1 O=00 H1A=1 C1A=0 FA=0 D1=0 D2=1
//! → A=1 Z=1 SP=71
//! → A=1 Z=2 M=C
//! ```
//!
//! Type 1 status reports each zone's temperature, setpoint and mode
//! (`O`ff, `H`eat, `C`ool, `A`uto, `I`nvalid). Type 2 status reports the
//! system-wide stage calls and each zone's damper, where `0` means open.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::command::ZoneCommand;
use crate::error::HardwareError;
use crate::state::ZoneRuntimeState;
use crate::types::{HvacAction, HvacMode};
use crate::zone::Zone;

use super::ZoneHardware;

/// Minimum pause between two writes to the controller.
const WRITE_SPACING: Duration = Duration::from_millis(11);

/// How long a status snapshot serves zone reads.
const DEFAULT_FRESHNESS: Duration = Duration::from_secs(1);

/// Unexpected lines tolerated while waiting for a status reply.
const MAX_SKIPPED_LINES: usize = 4;

/// The two status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusQuery {
    /// Per-zone temperature, setpoint and mode.
    Zones,
    /// Stage calls and dampers.
    System,
}

impl StatusQuery {
    const fn request(self) -> &'static [u8] {
        match self {
            Self::Zones => b"A=1 R=1\r",
            Self::System => b"A=1 R=2\r",
        }
    }

    /// Returns `true` if `line` is a reply to this query.
    ///
    /// Replies carry no request id, so they are told apart by their keys:
    /// only type 1 status has `Z=` fields.
    fn matches(self, line: &str) -> bool {
        let mut keys = line
            .split_whitespace()
            .filter_map(|token| token.split_once('=').map(|(key, _)| key));
        match self {
            Self::Zones => keys.any(|key| key == "Z"),
            Self::System => keys.all(|key| key != "Z") && line.split_whitespace().any(is_system_token),
        }
    }
}

fn is_system_token(token: &str) -> bool {
    let Some((key, _)) = token.split_once('=') else {
        return false;
    };
    matches!(key, "H1A" | "H2A" | "H3A" | "C1A" | "C2A" | "FA")
        || key
            .strip_prefix('D')
            .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

/// One zone's entry in a type 1 status line.
#[derive(Debug, Clone, Default, PartialEq)]
struct ZoneReport {
    temperature: Option<f64>,
    setpoint: Option<f64>,
    mode: Option<char>,
}

/// Parsed type 1 and type 2 status.
#[derive(Debug, Clone, Default, PartialEq)]
struct StatusSnapshot {
    zones: BTreeMap<u16, ZoneReport>,
    heat_call: bool,
    cool_call: bool,
    fan_call: bool,
    dampers_open: BTreeMap<u16, bool>,
}

impl StatusSnapshot {
    fn parse(type1: &str, type2: &str) -> Result<Self, HardwareError> {
        let mut snapshot = Self::default();
        snapshot.parse_type1(type1)?;
        snapshot.parse_type2(type2)?;
        Ok(snapshot)
    }

    fn parse_type1(&mut self, line: &str) -> Result<(), HardwareError> {
        let mut current: Option<u16> = None;
        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if key == "Z" {
                let index = parse_number::<u16>(token, value)?;
                self.zones.entry(index).or_default();
                current = Some(index);
                continue;
            }
            let Some(report) = current.and_then(|i| self.zones.get_mut(&i)) else {
                continue;
            };
            match key {
                "T" => report.temperature = Some(parse_number(token, value)?),
                "SP" => report.setpoint = Some(parse_number(token, value)?),
                "M" => {
                    let mut chars = value.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c @ ('O' | 'H' | 'C' | 'A' | 'I')), None) => report.mode = Some(c),
                        _ => return Err(bad_token(token)),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_type2(&mut self, line: &str) -> Result<(), HardwareError> {
        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "H1A" | "H2A" | "H3A" => self.heat_call |= parse_flag(token, value)?,
                "C1A" | "C2A" => self.cool_call |= parse_flag(token, value)?,
                "FA" => self.fan_call |= parse_flag(token, value)?,
                _ => {
                    if let Some(index) = key.strip_prefix('D')
                        && !index.is_empty()
                        && index.bytes().all(|b| b.is_ascii_digit())
                    {
                        let index = parse_number::<u16>(token, index)?;
                        // 0 = open
                        let open = !parse_flag(token, value)?;
                        self.dampers_open.insert(index, open);
                    }
                }
            }
        }
        Ok(())
    }

    fn zone_state(&self, index: u16) -> Result<ZoneRuntimeState, HardwareError> {
        let report = self
            .zones
            .get(&index)
            .ok_or(HardwareError::UnknownZone(index))?;
        let mode = match report.mode {
            Some('O') => HvacMode::Off,
            Some('H') => HvacMode::Heat,
            Some('C') => HvacMode::Cool,
            Some('A') => HvacMode::Auto,
            Some(other) => {
                return Err(HardwareError::Protocol(format!(
                    "zone {index} reports mode {other}"
                )));
            }
            None => {
                return Err(HardwareError::Protocol(format!(
                    "zone {index} reports no mode"
                )));
            }
        };

        let damper_open = self.dampers_open.get(&index).copied().unwrap_or(false);
        let action = if mode == HvacMode::Off {
            HvacAction::Off
        } else if damper_open && self.heat_call {
            HvacAction::Heating
        } else if damper_open && self.cool_call {
            HvacAction::Cooling
        } else if damper_open && self.fan_call {
            HvacAction::Fan
        } else {
            HvacAction::Idle
        };

        Ok(ZoneRuntimeState {
            mode,
            action,
            target_temperature: report.setpoint,
            current_temperature: report.temperature,
        })
    }
}

fn bad_token(token: &str) -> HardwareError {
    HardwareError::Protocol(format!("malformed status field {token:?}"))
}

fn parse_number<T: std::str::FromStr>(token: &str, value: &str) -> Result<T, HardwareError> {
    value.parse().map_err(|_| bad_token(token))
}

fn parse_flag(token: &str, value: &str) -> Result<bool, HardwareError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(bad_token(token)),
    }
}

const fn mode_letter(mode: HvacMode) -> char {
    match mode {
        HvacMode::Off => 'O',
        HvacMode::Heat => 'H',
        HvacMode::Cool => 'C',
        HvacMode::Auto => 'A',
    }
}

struct Port<S> {
    stream: BufReader<S>,
    last_write: Option<Instant>,
    snapshot: Option<(Instant, StatusSnapshot)>,
}

impl<S> Port<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, request: &[u8]) -> Result<(), HardwareError> {
        if let Some(last) = self.last_write {
            tokio::time::sleep_until(last + WRITE_SPACING).await;
        }
        let stream = self.stream.get_mut();
        stream.write_all(request).await?;
        stream.flush().await?;
        self.last_write = Some(Instant::now());
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, HardwareError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\r', &mut buf).await?;
        if n == 0 {
            return Err(HardwareError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        String::from_utf8(buf)
            .map(|line| line.trim_end_matches('\r').to_string())
            .map_err(|_| HardwareError::Protocol("non-ASCII status line".to_string()))
    }

    /// Drops whatever the controller sent that nobody read, e.g. the late
    /// reply to a query abandoned by a timeout. Never waits for input.
    async fn discard_pending(&mut self) -> Result<usize, HardwareError> {
        let mut discarded = 0;
        loop {
            let buffered = self.stream.buffer().len();
            if buffered > 0 {
                self.stream.consume(buffered);
                discarded += buffered;
            }
            // A zero timeout still polls the read once.
            match tokio::time::timeout(Duration::ZERO, self.stream.fill_buf()).await {
                Ok(Ok(buf)) if !buf.is_empty() => {}
                Ok(Ok(_)) | Err(_) => return Ok(discarded),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Sends a status query and returns its reply.
    ///
    /// Stale input is discarded first, and lines that cannot be a reply to
    /// `query` are skipped, so an earlier cancelled exchange never shifts
    /// replies onto the wrong query.
    async fn query(&mut self, query: StatusQuery) -> Result<String, HardwareError> {
        let stale = self.discard_pending().await?;
        if stale > 0 {
            tracing::debug!(bytes = stale, "Discarded stale controller output");
        }
        self.write(query.request()).await?;
        for _ in 0..=MAX_SKIPPED_LINES {
            let line = self.read_line().await?;
            if query.matches(&line) {
                return Ok(line);
            }
            tracing::debug!(?query, %line, "Skipping unexpected controller line");
        }
        Err(HardwareError::Protocol(format!(
            "no reply to {query:?} status query"
        )))
    }

    async fn status(&mut self, freshness: Duration) -> Result<&StatusSnapshot, HardwareError> {
        let stale = self
            .snapshot
            .as_ref()
            .is_none_or(|(taken, _)| taken.elapsed() >= freshness);
        if stale {
            self.snapshot = None;
            let type1 = self.query(StatusQuery::Zones).await?;
            let type2 = self.query(StatusQuery::System).await?;
            tracing::trace!(%type1, %type2, "Controller status");
            let snapshot = StatusSnapshot::parse(&type1, &type2)?;
            self.snapshot = Some((Instant::now(), snapshot));
        }
        self.snapshot
            .as_ref()
            .map(|(_, snapshot)| snapshot)
            .ok_or_else(|| HardwareError::Protocol("no status available".to_string()))
    }
}

/// [`ZoneHardware`] for an RCS ZC6R controller on any byte stream.
///
/// All zones share one line to the controller, so requests are serialized
/// internally. Zone reads within the freshness window (one second by
/// default) are served from the same status snapshot, which keeps a poll
/// cycle over all zones at two queries.
///
/// # Examples
///
/// ```no_run
/// use rcs_hvac_bridge::hardware::RcsController;
///
/// # async fn example() -> std::io::Result<()> {
/// let port = tokio::fs::OpenOptions::new()
///     .read(true)
///     .write(true)
///     .open("/dev/ttyUSB0")
///     .await?;
/// let controller = RcsController::new(port).with_setpoint_range(40.0, 99.0);
/// # Ok(())
/// # }
/// ```
pub struct RcsController<S> {
    port: Mutex<Port<S>>,
    min_setpoint: f64,
    max_setpoint: f64,
    freshness: Duration,
}

impl<S> RcsController<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a driver on an open stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            port: Mutex::new(Port {
                stream: BufReader::new(stream),
                last_write: None,
                snapshot: None,
            }),
            min_setpoint: 40.0,
            max_setpoint: 99.0,
            freshness: DEFAULT_FRESHNESS,
        }
    }

    /// Sets the accepted setpoint range (inclusive).
    #[must_use]
    pub fn with_setpoint_range(mut self, min: f64, max: f64) -> Self {
        self.min_setpoint = min;
        self.max_setpoint = max;
        self
    }

    /// Sets how long one status snapshot serves zone reads.
    #[must_use]
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    fn command_line(&self, zone: &Zone, command: &ZoneCommand) -> Result<String, HardwareError> {
        match *command {
            ZoneCommand::SetMode(mode) => {
                Ok(format!("A=1 Z={} M={}\r", zone.index(), mode_letter(mode)))
            }
            ZoneCommand::SetTargetTemperature(t) => {
                if !t.is_finite() || t < self.min_setpoint || t > self.max_setpoint {
                    return Err(HardwareError::Rejected(format!(
                        "setpoint {t} outside {}..={}",
                        self.min_setpoint, self.max_setpoint
                    )));
                }
                Ok(format!("A=1 Z={} SP={t:.0}\r", zone.index()))
            }
        }
    }
}

#[async_trait]
impl<S> ZoneHardware for RcsController<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&self, zone: &Zone) -> Result<ZoneRuntimeState, HardwareError> {
        let mut port = self.port.lock().await;
        port.status(self.freshness).await?.zone_state(zone.index())
    }

    async fn apply(&self, zone: &Zone, command: &ZoneCommand) -> Result<(), HardwareError> {
        let line = self.command_line(zone, command)?;
        let mut port = self.port.lock().await;
        // The next read must see the effect of this command.
        port.snapshot = None;
        port.write(line.as_bytes()).await?;
        tracing::debug!(zone = %zone, command = %line.trim_end(), "Sent controller command");
        Ok(())
    }
}

impl<S> std::fmt::Debug for RcsController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcsController")
            .field("min_setpoint", &self.min_setpoint)
            .field("max_setpoint", &self.max_setpoint)
            .field("freshness", &self.freshness)
            .finish_non_exhaustive()
    }
}
