//! Per-device observation cache.
//!
//! A [`DeviceState`] mirrors the last SNMP-derived facts Zino observed about
//! one router: its interface table, BGP peer table, BFD session table,
//! chassis alarm counts and reachability. It is created on the first
//! successful poll, mutated only by task runs and trap handlers, and
//! destroyed when the device is removed from the pollfile.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// IANA enterprise number assigned to Cisco.
pub const CISCO_ENTERPRISE_ID: u32 = 9;

/// IANA enterprise number assigned to Juniper.
pub const JUNIPER_ENTERPRISE_ID: u32 = 2636;

/// Operational interface state, mostly ifOperStatus from RFC 2863, plus the
/// Zino-internal `Flapping` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterfaceState {
    AdminDown,
    Up,
    Down,
    Testing,
    Unknown,
    Dormant,
    NotPresent,
    LowerLayerDown,
    Flapping,
}

impl InterfaceState {
    /// Maps an ifOperStatus/ifAdminStatus integer from IF-MIB.
    pub fn from_mib_value(value: i64) -> Self {
        match value {
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::Testing,
            5 => Self::Dormant,
            6 => Self::NotPresent,
            7 => Self::LowerLayerDown,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminDown => "adminDown",
            Self::Up => "up",
            Self::Down => "down",
            Self::Testing => "testing",
            Self::Unknown => "unknown",
            Self::Dormant => "dormant",
            Self::NotPresent => "notPresent",
            Self::LowerLayerDown => "lowerLayerDown",
            Self::Flapping => "flapping",
        }
    }
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BGP peering session operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpOperState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
    Down,
}

impl BgpOperState {
    /// Maps a bgpPeerState integer from BGP4-MIB (and its vendor variants).
    pub fn from_mib_value(value: i64) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::Connect,
            3 => Self::Active,
            4 => Self::OpenSent,
            5 => Self::OpenConfirm,
            6 => Self::Established,
            _ => Self::Down,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connect => "connect",
            Self::Active => "active",
            Self::OpenSent => "opensent",
            Self::OpenConfirm => "openconfirm",
            Self::Established => "established",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for BgpOperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BGP peering session administrative status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpAdminStatus {
    Running,
    Halted,
    Start,
    Stop,
    Unknown,
}

impl BgpAdminStatus {
    /// Maps a bgpPeerAdminStatus integer (1 = stop, 2 = start).
    pub fn from_mib_value(value: i64) -> Self {
        match value {
            1 => Self::Stop,
            2 => Self::Start,
            _ => Self::Unknown,
        }
    }

    /// True for the statuses that mean the operator has turned the peer off.
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Stop | Self::Halted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BgpAdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BFD session state per BFD-STD-MIB, plus Cisco's proprietary `failing` and
/// the internal `noSession` used when a session disappears from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BfdSessState {
    AdminDown,
    Down,
    Init,
    Up,
    Failing,
    NoSession,
}

impl BfdSessState {
    /// Maps a bfdSessState integer from BFD-STD-MIB.
    pub fn from_mib_value(value: i64) -> Self {
        match value {
            1 => Self::AdminDown,
            2 => Self::Down,
            3 => Self::Init,
            4 => Self::Up,
            5 => Self::Failing,
            _ => Self::NoSession,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminDown => "adminDown",
            Self::Down => "down",
            Self::Init => "init",
            Self::Up => "up",
            Self::Failing => "failing",
            Self::NoSession => "noSession",
        }
    }
}

impl fmt::Display for BfdSessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BfdSessState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "adminDown" => Ok(Self::AdminDown),
            "down" => Ok(Self::Down),
            "init" => Ok(Self::Init),
            "up" => Ok(Self::Up),
            "failing" => Ok(Self::Failing),
            "noSession" => Ok(Self::NoSession),
            _ => Err(format!("unknown BFD session state: {s}")),
        }
    }
}

/// BFD session facts for one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdState {
    pub session_state: BfdSessState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_discr: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_addr: Option<IpAddr>,
}

/// One row of the interface table as Zino remembers it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub ifindex: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifdescr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifalias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<InterfaceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_state: Option<InterfaceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bfd_state: Option<BfdState>,
}

impl Port {
    pub fn new(ifindex: u32) -> Self {
        Self {
            ifindex,
            ..Default::default()
        }
    }
}

/// Cached facts about one BGP peering session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpPeerSession {
    #[serde(default)]
    pub uptime: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_status: Option<BgpAdminStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oper_state: Option<BgpOperState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_as: Option<u32>,
}

/// Chassis alarm counters (Juniper only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmCounts {
    pub yellow: u32,
    pub red: u32,
}

/// The full observation cache for a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    pub name: String,
    /// All source addresses this device is known to speak from.
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
    /// Enterprise number extracted from sysObjectID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_id: Option<u32>,
    #[serde(default)]
    pub ports: BTreeMap<u32, Port>,
    #[serde(default)]
    pub bgp_peers: HashMap<IpAddr, BgpPeerSession>,
    #[serde(default)]
    pub bfd_sessions: HashMap<u32, BfdState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarms: Option<AlarmCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<DateTime<Utc>>,
    /// MIB dialect selected by the BGP probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_style: Option<BgpStyle>,
    /// Whether the most recent reachability check succeeded.
    #[serde(default = "default_true")]
    pub reachable_in_last_run: bool,
    /// Consecutive failed reachability probes.
    #[serde(default)]
    pub reachability_failures: u32,
}

fn default_true() -> bool {
    true
}

/// Which vendor flavor of the BGP MIBs a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpStyle {
    Juniper,
    Cisco,
    General,
}

impl fmt::Display for BgpStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Juniper => f.write_str("juniper"),
            Self::Cisco => f.write_str("cisco"),
            Self::General => f.write_str("general"),
        }
    }
}

impl DeviceState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            addresses: Vec::new(),
            enterprise_id: None,
            ports: BTreeMap::new(),
            bgp_peers: HashMap::new(),
            bfd_sessions: HashMap::new(),
            alarms: None,
            boot_time: None,
            bgp_style: None,
            reachable_in_last_run: true,
            reachability_failures: 0,
        }
    }

    pub fn is_cisco(&self) -> bool {
        self.enterprise_id == Some(CISCO_ENTERPRISE_ID)
    }

    pub fn is_juniper(&self) -> bool {
        self.enterprise_id == Some(JUNIPER_ENTERPRISE_ID)
    }

    /// Calculates and records the device boot time from a sysUpTime value
    /// (in hundredths of a second).
    pub fn set_boot_time_from_uptime(&mut self, uptime_ticks: u64) {
        self.boot_time = Some(Utc::now() - Duration::milliseconds(uptime_ticks as i64 * 10));
    }

    /// Returns the port with the given ifindex, creating a blank entry if
    /// none exists.
    pub fn port_mut(&mut self, ifindex: u32) -> &mut Port {
        self.ports.entry(ifindex).or_insert_with(|| Port::new(ifindex))
    }
}

/// The observation caches for every device Zino polls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStates {
    pub devices: BTreeMap<String, DeviceState>,
}

impl DeviceStates {
    pub fn get(&self, name: &str) -> Option<&DeviceState> {
        self.devices.get(name)
    }

    /// Returns the state for `name`, creating a blank one if none exists.
    pub fn get_or_create(&mut self, name: &str) -> &mut DeviceState {
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| DeviceState::new(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DeviceState> {
        self.devices.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<DeviceState> {
        self.devices.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_state_from_mib_value() {
        assert_eq!(InterfaceState::from_mib_value(1), InterfaceState::Up);
        assert_eq!(InterfaceState::from_mib_value(2), InterfaceState::Down);
        assert_eq!(InterfaceState::from_mib_value(99), InterfaceState::Unknown);
    }

    #[test]
    fn test_bgp_oper_state_display() {
        assert_eq!(BgpOperState::Established.to_string(), "established");
        assert_eq!(BgpOperState::OpenSent.to_string(), "opensent");
    }

    #[test]
    fn test_bfd_state_roundtrip() {
        for state in [
            BfdSessState::AdminDown,
            BfdSessState::Down,
            BfdSessState::Init,
            BfdSessState::Up,
            BfdSessState::Failing,
        ] {
            assert_eq!(state.as_str().parse::<BfdSessState>().unwrap(), state);
        }
    }

    #[test]
    fn test_enterprise_id_detection() {
        let mut device = DeviceState::new("example-gw");
        assert!(!device.is_juniper());
        device.enterprise_id = Some(JUNIPER_ENTERPRISE_ID);
        assert!(device.is_juniper());
        assert!(!device.is_cisco());
    }

    #[test]
    fn test_get_or_create_returns_blank_state() {
        let mut devices = DeviceStates::default();
        assert!(!devices.contains("example-gw"));
        let state = devices.get_or_create("example-gw");
        assert_eq!(state.name, "example-gw");
        assert!(state.reachable_in_last_run);
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_boot_time_from_uptime() {
        let mut device = DeviceState::new("example-gw");
        device.set_boot_time_from_uptime(360_000); // one hour of ticks
        let boot = device.boot_time.unwrap();
        let age = Utc::now() - boot;
        assert!((age.num_seconds() - 3600).abs() < 5);
    }
}
