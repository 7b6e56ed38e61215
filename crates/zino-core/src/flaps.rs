//! Interface flap tracking.
//!
//! Keeps a rolling window of link transitions per (device, ifindex) and
//! classifies ports as flapping or stable with hysteresis: a port becomes
//! flapping once enough transitions land inside the window, and only returns
//! to stable after the window drains *and* the port has held its state for
//! the stabilization period. While a port flaps, individual transitions
//! update the existing portstate event instead of creating new ones.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::FlapState;

/// Sliding window length for counting transitions.
pub const FLAP_WINDOW_SECONDS: i64 = 300;

/// Transitions inside the window at which a port is declared flapping.
pub const FLAP_THRESHOLD_HIGH: usize = 3;

/// The window count must fall below this before a port can stabilize.
pub const FLAP_THRESHOLD_LOW: usize = 1;

/// Quiescence required before a flapping port is declared stable again.
pub const STABILIZE_SECONDS: i64 = 120;

/// Identifies one interface on one device. Serialized as the string
/// `"router:ifindex"` so it can key a JSON map in the state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortIndex {
    pub router: String,
    pub ifindex: u32,
}

impl PortIndex {
    pub fn new(router: &str, ifindex: u32) -> Self {
        Self {
            router: router.to_string(),
            ifindex,
        }
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.router, self.ifindex)
    }
}

impl FromStr for PortIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (router, ifindex) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("not a router:ifindex pair: {s}"))?;
        let ifindex = ifindex
            .parse()
            .map_err(|_| format!("bad ifindex in port index: {s}"))?;
        Ok(Self {
            router: router.to_string(),
            ifindex,
        })
    }
}

impl Serialize for PortIndex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortIndex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Rolling flap statistics for a single port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlapHistory {
    /// Transition timestamps still inside the window.
    window: VecDeque<DateTime<Utc>>,
    /// Total transitions observed since tracking began.
    pub flaps: u32,
    pub first_flap: DateTime<Utc>,
    pub last_flap: DateTime<Utc>,
    pub state: FlapState,
    /// When the port last went oper-down, if it is currently down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    down_since: Option<DateTime<Utc>>,
    /// Milliseconds accumulated in down state.
    #[serde(default)]
    pub ac_down_ms: u64,
}

impl FlapHistory {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            window: VecDeque::new(),
            flaps: 0,
            first_flap: now,
            last_flap: now,
            state: FlapState::Stable,
            down_since: None,
            ac_down_ms: 0,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(FLAP_WINDOW_SECONDS);
        while self.window.front().map(|t| *t < cutoff).unwrap_or(false) {
            self.window.pop_front();
        }
    }

    /// Records one transition and returns the resulting flap state.
    fn record(&mut self, now: DateTime<Utc>, went_down: bool) -> FlapState {
        self.prune(now);
        self.window.push_back(now);
        self.flaps += 1;
        self.last_flap = now;

        if went_down {
            self.down_since = Some(now);
        } else if let Some(since) = self.down_since.take() {
            self.ac_down_ms += (now - since).num_milliseconds().max(0) as u64;
        }

        if self.window.len() >= FLAP_THRESHOLD_HIGH {
            self.state = FlapState::Flapping;
        }
        self.state
    }

    /// True when a flapping port has quiesced long enough to stabilize.
    fn is_quiesced(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != FlapState::Flapping {
            return false;
        }
        self.prune(now);
        self.window.len() < FLAP_THRESHOLD_LOW
            && now - self.last_flap >= Duration::seconds(STABILIZE_SECONDS)
    }

    pub fn in_window(&self) -> usize {
        self.window.len()
    }

    /// Total milliseconds down, including an ongoing outage.
    pub fn down_ms(&self, now: DateTime<Utc>) -> u64 {
        let ongoing = self
            .down_since
            .map(|since| (now - since).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.ac_down_ms + ongoing
    }
}

/// Flap statistics for all tracked ports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlappingStates {
    pub interfaces: HashMap<PortIndex, FlapHistory>,
}

impl FlappingStates {
    /// Feeds one link transition into the tracker and returns the port's
    /// flap state afterwards.
    pub fn update(&mut self, index: &PortIndex, went_down: bool) -> FlapState {
        self.update_at(index, went_down, Utc::now())
    }

    pub fn update_at(
        &mut self,
        index: &PortIndex,
        went_down: bool,
        now: DateTime<Utc>,
    ) -> FlapState {
        self.interfaces
            .entry(index.clone())
            .or_insert_with(|| FlapHistory::new(now))
            .record(now, went_down)
    }

    pub fn is_flapping(&self, index: &PortIndex) -> bool {
        self.interfaces
            .get(index)
            .map(|f| f.state == FlapState::Flapping)
            .unwrap_or(false)
    }

    pub fn flap_count(&self, index: &PortIndex) -> u32 {
        self.interfaces.get(index).map(|f| f.flaps).unwrap_or(0)
    }

    pub fn get(&self, index: &PortIndex) -> Option<&FlapHistory> {
        self.interfaces.get(index)
    }

    /// Drops all tracking for a port (CLEARFLAP).
    pub fn clear(&mut self, index: &PortIndex) -> Option<FlapHistory> {
        self.interfaces.remove(index)
    }

    /// Returns the ports that have quiesced and flips them to stable.
    /// Entries that were never declared flapping and have drained their
    /// window are silently dropped.
    pub fn age(&mut self, now: DateTime<Utc>) -> Vec<PortIndex> {
        let mut stabilized = Vec::new();
        let mut dead = Vec::new();
        for (index, history) in self.interfaces.iter_mut() {
            if history.is_quiesced(now) {
                history.state = FlapState::Stable;
                stabilized.push(index.clone());
            } else if history.state == FlapState::Stable {
                history.prune(now);
                if history.in_window() == 0
                    && now - history.last_flap > Duration::seconds(FLAP_WINDOW_SECONDS)
                {
                    dead.push(index.clone());
                }
            }
        }
        for index in dead {
            self.interfaces.remove(&index);
        }
        stabilized
    }
}
