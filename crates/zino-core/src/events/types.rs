//! Event data structures and the event state machine.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{BfdSessState, BgpAdminStatus, BgpOperState, InterfaceState};
use crate::error::CoreError;

/// The set of allowable event states.
///
/// `Embryonic` is the pre-commit staging state, visible only to the creator;
/// the first commit moves the event to `Open` (or `Ignored` when a planned
/// maintenance suppresses it). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventState {
    #[serde(rename = "embryonic")]
    Embryonic,
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "working")]
    Working,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "confirm-wait")]
    Confirm,
    #[serde(rename = "ignored")]
    Ignored,
    #[serde(rename = "closed")]
    Closed,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embryonic => "embryonic",
            Self::Open => "open",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Confirm => "confirm-wait",
            Self::Ignored => "ignored",
            Self::Closed => "closed",
        }
    }

    /// All states an operator may name in a SETSTATE command.
    pub const OPERATOR_STATES: [EventState; 6] = [
        Self::Open,
        Self::Working,
        Self::Waiting,
        Self::Confirm,
        Self::Ignored,
        Self::Closed,
    ];
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embryonic" => Ok(Self::Embryonic),
            "open" => Ok(Self::Open),
            "working" => Ok(Self::Working),
            "waiting" => Ok(Self::Waiting),
            "confirm-wait" => Ok(Self::Confirm),
            "ignored" => Ok(Self::Ignored),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("unknown event state: {s}")),
        }
    }
}

/// Reachability verdict for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReachabilityStatus {
    #[serde(rename = "reachable")]
    Reachable,
    #[serde(rename = "no-response")]
    NoResponse,
}

impl fmt::Display for ReachabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => f.write_str("reachable"),
            Self::NoResponse => f.write_str("no-response"),
        }
    }
}

/// Flap classification of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlapState {
    Flapping,
    Stable,
}

impl fmt::Display for FlapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flapping => f.write_str("flapping"),
            Self::Stable => f.write_str("stable"),
        }
    }
}

/// Chassis alarm color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmColor {
    Yellow,
    Red,
}

impl fmt::Display for AlarmColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yellow => f.write_str("yellow"),
            Self::Red => f.write_str("red"),
        }
    }
}

/// One entry in an event's `log` or `history` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Renders this entry as legacy protocol lines: the first line carries a
    /// UNIX timestamp, each continuation line is prefixed by a space.
    pub fn dump_legacy(&self) -> Vec<String> {
        let ts = self.timestamp.timestamp();
        let mut lines: Vec<String> = self.message.lines().map(|l| format!(" {l}")).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        lines[0] = format!("{ts}{}", lines[0]);
        lines
    }
}

/// The per-type discriminator that makes an event key unique on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubIndex {
    None,
    Interface(u32),
    Peer(IpAddr),
    BfdSession(u32),
    Alarm(AlarmColor),
}

impl fmt::Display for SubIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("-"),
            Self::Interface(ix) => write!(f, "{ix}"),
            Self::Peer(addr) => write!(f, "{addr}"),
            Self::BfdSession(discr) => write!(f, "{discr}"),
            Self::Alarm(color) => write!(f, "{color}"),
        }
    }
}

/// Event type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Reachability,
    PortState,
    Bgp,
    Bfd,
    Alarm,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachability => "reachability",
            Self::PortState => "portstate",
            Self::Bgp => "bgp",
            Self::Bfd => "bfd",
            Self::Alarm => "alarm",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of an event: `(router, subindex, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub router: String,
    pub subindex: SubIndex,
    pub kind: EventKind,
}

/// Per-type event payload, tagged with the legacy `type` discriminant in
/// serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventData {
    Reachability(ReachabilityData),
    Portstate(PortStateData),
    Bgp(BgpData),
    Bfd(BfdData),
    Alarm(AlarmData),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachability: Option<ReachabilityStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortStateData {
    /// ifDescr of the affected port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub ifindex: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portstate: Option<InterfaceState>,
    /// ifAlias of the affected port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flapstate: Option<FlapState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpData {
    pub remote_addr: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_as: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_uptime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_os: Option<BgpOperState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_as: Option<BgpAdminStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BfdData {
    pub bfd_discr: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifindex: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bfd_state: Option<BfdSessState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bfd_ix: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bfd_addr: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neigh_rdns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmData {
    pub alarm_type: AlarmColor,
    #[serde(default)]
    pub alarm_count: u32,
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Reachability(_) => EventKind::Reachability,
            Self::Portstate(_) => EventKind::PortState,
            Self::Bgp(_) => EventKind::Bgp,
            Self::Bfd(_) => EventKind::Bfd,
            Self::Alarm(_) => EventKind::Alarm,
        }
    }

    pub fn subindex(&self) -> SubIndex {
        match self {
            Self::Reachability(_) => SubIndex::None,
            Self::Portstate(data) => SubIndex::Interface(data.ifindex),
            Self::Bgp(data) => SubIndex::Peer(data.remote_addr),
            Self::Bfd(data) => SubIndex::BfdSession(data.bfd_discr),
            Self::Alarm(data) => SubIndex::Alarm(data.alarm_type),
        }
    }
}

/// One tracked incident on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u32,
    pub router: String,
    pub state: EventState,
    pub opened: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<DateTime<Utc>>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polladdr: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastevent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lasttrans: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flaps: Option<u32>,
    /// Milliseconds spent in down state since this event opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac_down: Option<u64>,
    /// Id of the planned maintenance that matched this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm: Option<u32>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub history: Vec<LogEntry>,
    #[serde(flatten)]
    pub data: EventData,
}

fn default_priority() -> u32 {
    100
}

impl Event {
    /// Creates a fresh embryonic event. Only the store hands out ids.
    pub(crate) fn new(id: u32, router: &str, data: EventData) -> Self {
        let now = Utc::now();
        Self {
            id,
            router: router.to_string(),
            state: EventState::Embryonic,
            opened: now,
            updated: now,
            closed: None,
            priority: default_priority(),
            polladdr: None,
            lastevent: None,
            lasttrans: None,
            flaps: None,
            ac_down: None,
            pm: None,
            log: Vec::new(),
            history: Vec::new(),
            data,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn subindex(&self) -> SubIndex {
        self.data.subindex()
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            router: self.router.clone(),
            subindex: self.subindex(),
            kind: self.kind(),
        }
    }

    /// Sets a new state, recording the change in the event history.
    ///
    /// Closed is terminal: any transition out of it is refused. Leaving the
    /// embryonic staging state stamps `opened`; entering `Closed` stamps
    /// `closed`.
    pub fn set_state(&mut self, new_state: EventState, user: &str) -> Result<(), CoreError> {
        if new_state == self.state {
            return Ok(());
        }
        if self.state == EventState::Closed {
            return Err(CoreError::ClosedEvent(self.id));
        }

        let old_state = self.state;
        self.state = new_state;
        let now = Utc::now();
        if old_state == EventState::Embryonic {
            self.opened = now;
        }
        if new_state == EventState::Closed {
            self.closed = Some(now);
        }
        self.add_history(format!("state change {old_state} -> {new_state} ({user})"));
        Ok(())
    }

    pub fn add_log(&mut self, message: impl Into<String>) -> &LogEntry {
        let entry = LogEntry::new(message);
        self.updated = entry.timestamp;
        self.log.push(entry);
        self.log.last().unwrap()
    }

    pub fn add_history(&mut self, message: impl Into<String>) -> &LogEntry {
        self.history.push(LogEntry::new(message));
        self.history.last().unwrap()
    }

    /// Returns the protocol-facing names of the attributes that differ
    /// between this event and `older`.
    ///
    /// The names match what GETATTRS exposes; `log` and `history` compare by
    /// length since entries are append-only.
    pub fn diff_fields(&self, older: &Event) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let mut check = |name: &'static str, differs: bool| {
            if differs {
                changed.push(name);
            }
        };

        check("state", self.state != older.state);
        check("opened", self.opened != older.opened);
        check("closed", self.closed != older.closed);
        check("priority", self.priority != older.priority);
        check("polladdr", self.polladdr != older.polladdr);
        check("lastevent", self.lastevent != older.lastevent);
        check("lasttrans", self.lasttrans != older.lasttrans);
        check("flaps", self.flaps != older.flaps);
        check("ac-down", self.ac_down != older.ac_down);
        check("pm", self.pm != older.pm);
        check("log", self.log.len() != older.log.len());
        check("history", self.history.len() != older.history.len());

        match (&self.data, &older.data) {
            (EventData::Reachability(new), EventData::Reachability(old)) => {
                check("reachability", new.reachability != old.reachability);
            }
            (EventData::Portstate(new), EventData::Portstate(old)) => {
                check("port", new.port != old.port);
                check("ifindex", new.ifindex != old.ifindex);
                check("portstate", new.portstate != old.portstate);
                check("descr", new.descr != old.descr);
                check("flapstate", new.flapstate != old.flapstate);
                check("reason", new.reason != old.reason);
            }
            (EventData::Bgp(new), EventData::Bgp(old)) => {
                check("remote-addr", new.remote_addr != old.remote_addr);
                check("remote-AS", new.remote_as != old.remote_as);
                check("peer-uptime", new.peer_uptime != old.peer_uptime);
                check("bgpOS", new.bgp_os != old.bgp_os);
                check("bgpAS", new.bgp_as != old.bgp_as);
            }
            (EventData::Bfd(new), EventData::Bfd(old)) => {
                check("bfdDiscr", new.bfd_discr != old.bfd_discr);
                check("ifindex", new.ifindex != old.ifindex);
                check("bfdState", new.bfd_state != old.bfd_state);
                check("bfdIx", new.bfd_ix != old.bfd_ix);
                check("bfdAddr", new.bfd_addr != old.bfd_addr);
                check("Neigh-rDNS", new.neigh_rdns != old.neigh_rdns);
            }
            (EventData::Alarm(new), EventData::Alarm(old)) => {
                check("alarm-type", new.alarm_type != old.alarm_type);
                check("alarm-count", new.alarm_count != old.alarm_count);
            }
            _ => changed.push("type"),
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portstate_event() -> Event {
        Event::new(
            1,
            "example-gw",
            EventData::Portstate(PortStateData {
                ifindex: 150,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_set_state_appends_history() {
        let mut event = portstate_event();
        event.set_state(EventState::Open, "monitor").unwrap();
        assert_eq!(event.history.len(), 1);
        assert_eq!(
            event.history[0].message,
            "state change embryonic -> open (monitor)"
        );
    }

    #[test]
    fn test_set_state_refuses_closed_reopen() {
        let mut event = portstate_event();
        event.set_state(EventState::Open, "monitor").unwrap();
        event.set_state(EventState::Closed, "op").unwrap();
        assert!(event.closed.is_some());
        assert!(matches!(
            event.set_state(EventState::Open, "op"),
            Err(CoreError::ClosedEvent(1))
        ));
    }

    #[test]
    fn test_set_state_same_state_is_noop() {
        let mut event = portstate_event();
        event.set_state(EventState::Embryonic, "monitor").unwrap();
        assert!(event.history.is_empty());
    }

    #[test]
    fn test_diff_fields_detects_data_changes() {
        let mut event = portstate_event();
        let old = event.clone();
        if let EventData::Portstate(ref mut data) = event.data {
            data.portstate = Some(InterfaceState::Down);
        }
        event.flaps = Some(4);
        let changed = event.diff_fields(&old);
        assert!(changed.contains(&"portstate"));
        assert!(changed.contains(&"flaps"));
        assert!(!changed.contains(&"state"));
    }

    #[test]
    fn test_subindex_per_kind() {
        assert_eq!(portstate_event().subindex(), SubIndex::Interface(150));
        let bgp = Event::new(
            2,
            "example-gw",
            EventData::Bgp(BgpData {
                remote_addr: "10.0.0.1".parse().unwrap(),
                remote_as: Some(100),
                peer_uptime: None,
                bgp_os: None,
                bgp_as: None,
            }),
        );
        assert_eq!(bgp.subindex(), SubIndex::Peer("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_log_entry_legacy_dump_multiline() {
        let entry = LogEntry {
            timestamp: DateTime::from_timestamp(1701171730, 0).unwrap(),
            message: "This is a\nmulti-line entry".to_string(),
        };
        assert_eq!(
            entry.dump_legacy(),
            vec![
                "1701171730 This is a".to_string(),
                " multi-line entry".to_string()
            ]
        );
    }

    #[test]
    fn test_event_data_serializes_with_type_tag() {
        let event = portstate_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "portstate");
        assert_eq!(json["ifindex"], 150);
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), EventKind::PortState);
    }
}
