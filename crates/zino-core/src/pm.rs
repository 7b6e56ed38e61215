//! Planned maintenance.
//!
//! A planned maintenance (PM) is a time-bounded rule that suppresses or
//! annotates events matching device/interface patterns. While a PM is
//! active, events it matches are created in the `ignored` state instead of
//! `open`; when it ends, its events are returned to `open`. PMs self-remove
//! one hour after their end time.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::{DeviceState, DeviceStates, Port};
use crate::error::{CoreError, Result};
use crate::events::{Event, EventData, LogEntry};

/// Grace period after `end_time` before a PM is garbage collected.
pub const PM_EXPIRY_GRACE_SECONDS: i64 = 3600;

/// How a PM's match expression is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    /// Device name equals the expression (device PMs only).
    #[serde(rename = "exact")]
    Exact,
    /// Expression appears as a substring anywhere in the matched text.
    #[serde(rename = "str")]
    Str,
    /// Unanchored regex search against the matched text.
    #[serde(rename = "regexp")]
    Regexp,
    /// Regex against the interface description, with `match_device`
    /// restricting the device (portstate PMs only).
    #[serde(rename = "intf-regexp")]
    IntfRegexp,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Str => "str",
            Self::Regexp => "regexp",
            Self::IntfRegexp => "intf-regexp",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "str" => Ok(Self::Str),
            "regexp" => Ok(Self::Regexp),
            "intf-regexp" => Ok(Self::IntfRegexp),
            _ => Err(format!("unknown match type: {s}")),
        }
    }
}

/// What class of events a PM targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmType {
    Portstate,
    Device,
}

impl PmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portstate => "portstate",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for PmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PmType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "portstate" => Ok(Self::Portstate),
            "device" => Ok(Self::Device),
            _ => Err(format!("unknown PM type: {s}")),
        }
    }
}

/// One time-bounded suppression/annotation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedMaintenance {
    pub id: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub pm_type: PmType,
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_device: Option<String>,
    pub match_expression: String,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    /// Events this PM put into the ignored state.
    #[serde(default)]
    pub event_ids: Vec<u32>,
}

impl PlannedMaintenance {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time + Duration::seconds(PM_EXPIRY_GRACE_SECONDS)
    }

    pub fn add_log(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry::new(message));
    }

    /// Renders `id start end type match_type [match_dev] match_expr`.
    pub fn details(&self) -> String {
        let mut parts = vec![
            self.id.to_string(),
            self.start_time.timestamp().to_string(),
            self.end_time.timestamp().to_string(),
            self.pm_type.to_string(),
            self.match_type.to_string(),
        ];
        if let Some(device) = &self.match_device {
            parts.push(device.clone());
        }
        parts.push(self.match_expression.clone());
        parts.join(" ")
    }

    /// Whether this PM affects the given event.
    pub fn matches_event(&self, event: &Event, devices: &DeviceStates) -> bool {
        match self.pm_type {
            PmType::Device => match &event.data {
                EventData::Reachability(_) | EventData::Alarm(_) => devices
                    .get(&event.router)
                    .map(|device| self.matches_device(device))
                    .unwrap_or(false),
                _ => false,
            },
            PmType::Portstate => match &event.data {
                EventData::Portstate(data) => {
                    let Some(device) = devices.get(&event.router) else {
                        return false;
                    };
                    let Some(port) = device.ports.get(&data.ifindex) else {
                        return false;
                    };
                    self.matches_portstate(device, port)
                }
                _ => false,
            },
        }
    }

    /// Whether device-targeted events for `device` would be affected.
    pub fn matches_device(&self, device: &DeviceState) -> bool {
        match self.match_type {
            MatchType::Exact => self.match_expression == device.name,
            MatchType::Str => device.name.contains(&self.match_expression),
            MatchType::Regexp => regex_search(&self.match_expression, &device.name),
            MatchType::IntfRegexp => false,
        }
    }

    /// Whether portstate events for `port` on `device` would be affected.
    pub fn matches_portstate(&self, device: &DeviceState, port: &Port) -> bool {
        let alias = port.ifalias.as_deref().unwrap_or("");
        let descr = port.ifdescr.as_deref().unwrap_or("");
        match self.match_type {
            MatchType::Str => {
                device.name.contains(&self.match_expression)
                    || alias.contains(&self.match_expression)
            }
            MatchType::Regexp => {
                regex_search(&self.match_expression, &device.name)
                    || regex_search(&self.match_expression, alias)
            }
            MatchType::IntfRegexp => {
                let device_matches = self
                    .match_device
                    .as_deref()
                    .map(|pattern| regex_search(pattern, &device.name))
                    .unwrap_or(false);
                device_matches && regex_search(&self.match_expression, descr)
            }
            MatchType::Exact => false,
        }
    }

    /// All (device, port) pairs or devices this PM currently matches,
    /// rendered for the PM MATCHING command.
    pub fn matching_lines(&self, devices: &DeviceStates) -> Vec<String> {
        let mut lines = Vec::new();
        for device in devices.devices.values() {
            match self.pm_type {
                PmType::Device => {
                    if self.matches_device(device) {
                        lines.push(format!("{} {} {}", self.id, self.pm_type, device.name));
                    }
                }
                PmType::Portstate => {
                    for port in device.ports.values() {
                        if self.matches_portstate(device, port) {
                            lines.push(format!(
                                "{} {} {} {} {} ({})",
                                self.id,
                                self.pm_type,
                                device.name,
                                port.ifindex,
                                port.ifdescr.as_deref().unwrap_or("-"),
                                port.ifalias.as_deref().unwrap_or(""),
                            ));
                        }
                    }
                }
            }
        }
        lines
    }
}

/// Unanchored regex search; an invalid pattern matches nothing.
fn regex_search(pattern: &str, text: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(err) => {
            warn!(pattern, %err, "invalid planned maintenance pattern");
            false
        }
    }
}

/// The collection of all planned maintenances.
#[derive(Debug, Clone, Default)]
pub struct PlannedMaintenances {
    pms: std::collections::BTreeMap<u32, PlannedMaintenance>,
    last_pm_id: u32,
    pub last_run: Option<DateTime<Utc>>,
}

impl PlannedMaintenances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(pms: Vec<PlannedMaintenance>) -> Self {
        let mut store = Self::default();
        for pm in pms {
            store.last_pm_id = store.last_pm_id.max(pm.id);
            store.pms.insert(pm.id, pm);
        }
        store
    }

    pub fn snapshot_parts(&self) -> Vec<PlannedMaintenance> {
        self.pms.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pms.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&PlannedMaintenance> {
        self.pms.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut PlannedMaintenance> {
        self.pms.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedMaintenance> {
        self.pms.values()
    }

    /// Creates a new PM and returns its id.
    pub fn create(
        &mut self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        pm_type: PmType,
        match_type: MatchType,
        match_expression: String,
        match_device: Option<String>,
    ) -> u32 {
        self.last_pm_id += 1;
        let id = self.last_pm_id;
        self.pms.insert(
            id,
            PlannedMaintenance {
                id,
                start_time,
                end_time,
                pm_type,
                match_type,
                match_device,
                match_expression,
                log: Vec::new(),
                event_ids: Vec::new(),
            },
        );
        debug!(pm = id, "created planned maintenance");
        id
    }

    /// Removes a PM, logging who cancelled it and why.
    pub fn cancel(&mut self, id: u32, reason: &str, user: &str) -> Result<PlannedMaintenance> {
        let mut pm = self
            .pms
            .remove(&id)
            .ok_or(CoreError::NoSuchMaintenance(id))?;
        pm.add_log(format!("PM closed by {user}: {reason}"));
        Ok(pm)
    }

    /// Active PMs in id-ascending order.
    pub fn active(&self, now: DateTime<Utc>) -> impl Iterator<Item = &PlannedMaintenance> {
        self.pms.values().filter(move |pm| pm.is_active(now))
    }

    /// PMs that started between the last periodic run and `now`.
    pub fn started_since_last_run(&self, now: DateTime<Utc>) -> Vec<u32> {
        let since = self.last_run.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.pms
            .values()
            .filter(|pm| pm.start_time > since && pm.start_time <= now && now < pm.end_time)
            .map(|pm| pm.id)
            .collect()
    }

    /// PMs that ended between the last periodic run and `now`.
    pub fn ended_since_last_run(&self, now: DateTime<Utc>) -> Vec<u32> {
        let since = self.last_run.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.pms
            .values()
            .filter(|pm| pm.end_time > since && pm.end_time <= now)
            .map(|pm| pm.id)
            .collect()
    }

    /// PMs past their expiry grace; these are garbage collected.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.pms
            .values()
            .filter(|pm| pm.is_expired(now))
            .map(|pm| pm.id)
            .collect()
    }

    pub fn remove(&mut self, id: u32) -> Option<PlannedMaintenance> {
        self.pms.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm(pm_type: PmType, match_type: MatchType, expr: &str, device: Option<&str>) -> PlannedMaintenance {
        PlannedMaintenance {
            id: 1,
            start_time: Utc::now() - Duration::minutes(5),
            end_time: Utc::now() + Duration::hours(1),
            pm_type,
            match_type,
            match_device: device.map(str::to_string),
            match_expression: expr.to_string(),
            log: Vec::new(),
            event_ids: Vec::new(),
        }
    }

    fn devices_with_port() -> DeviceStates {
        let mut devices = DeviceStates::default();
        let device = devices.get_or_create("blaafjell-gw2");
        let port = device.port_mut(150);
        port.ifdescr = Some("ge-1/0/10".to_string());
        port.ifalias = Some("transit,customer-x".to_string());
        devices
    }

    #[test]
    fn test_exact_match_is_device_only() {
        let devices = devices_with_port();
        let device = devices.get("blaafjell-gw2").unwrap();
        let rule = pm(PmType::Device, MatchType::Exact, "blaafjell-gw2", None);
        assert!(rule.matches_device(device));
        let noise = pm(PmType::Device, MatchType::Exact, "blaafjell", None);
        assert!(!noise.matches_device(device));
    }

    #[test]
    fn test_str_match_is_substring_anywhere() {
        let devices = devices_with_port();
        let device = devices.get("blaafjell-gw2").unwrap();
        let port = device.ports.get(&150).unwrap();
        let by_name = pm(PmType::Portstate, MatchType::Str, "aafjell", None);
        assert!(by_name.matches_portstate(device, port));
        let by_alias = pm(PmType::Portstate, MatchType::Str, "customer-x", None);
        assert!(by_alias.matches_portstate(device, port));
        let neither = pm(PmType::Portstate, MatchType::Str, "oslo", None);
        assert!(!neither.matches_portstate(device, port));
    }

    #[test]
    fn test_regexp_match_is_unanchored() {
        let devices = devices_with_port();
        let device = devices.get("blaafjell-gw2").unwrap();
        let rule = pm(PmType::Device, MatchType::Regexp, "gw[0-9]$", None);
        assert!(rule.matches_device(device));
    }

    #[test]
    fn test_intf_regexp_requires_device_and_descr_match() {
        let devices = devices_with_port();
        let device = devices.get("blaafjell-gw2").unwrap();
        let port = device.ports.get(&150).unwrap();

        let rule = pm(
            PmType::Portstate,
            MatchType::IntfRegexp,
            "ge-1/0/10",
            Some("blaafjell-gw2"),
        );
        assert!(rule.matches_portstate(device, port));

        let wrong_device = pm(
            PmType::Portstate,
            MatchType::IntfRegexp,
            "ge-1/0/10",
            Some("arkham-sw1"),
        );
        assert!(!wrong_device.matches_portstate(device, port));
    }

    #[test]
    fn test_invalid_regex_matches_nothing() {
        let devices = devices_with_port();
        let device = devices.get("blaafjell-gw2").unwrap();
        let rule = pm(PmType::Device, MatchType::Regexp, "([", None);
        assert!(!rule.matches_device(device));
    }

    #[test]
    fn test_active_and_expiry_windows() {
        let now = Utc::now();
        let mut rule = pm(PmType::Device, MatchType::Exact, "x", None);
        rule.start_time = now + Duration::minutes(10);
        rule.end_time = now + Duration::minutes(20);
        assert!(!rule.is_active(now));
        assert!(rule.is_active(now + Duration::minutes(10)));
        assert!(!rule.is_active(now + Duration::minutes(20)));
        assert!(!rule.is_expired(now + Duration::minutes(30)));
        assert!(rule.is_expired(
            now + Duration::minutes(20) + Duration::seconds(PM_EXPIRY_GRACE_SECONDS)
        ));
    }

    #[test]
    fn test_store_assigns_increasing_ids() {
        let mut store = PlannedMaintenances::new();
        let now = Utc::now();
        let first = store.create(
            now,
            now + Duration::hours(1),
            PmType::Device,
            MatchType::Exact,
            "a-gw".to_string(),
            None,
        );
        let second = store.create(
            now,
            now + Duration::hours(1),
            PmType::Device,
            MatchType::Exact,
            "b-gw".to_string(),
            None,
        );
        assert_eq!((first, second), (1, 2));
        store.cancel(first, "no longer needed", "operator").unwrap();
        assert!(store.get(first).is_none());
        assert!(store.get(second).is_some());
    }

    #[test]
    fn test_details_rendering() {
        let mut rule = pm(
            PmType::Portstate,
            MatchType::IntfRegexp,
            "ge-1/0/10",
            Some("blaafjell-gw2"),
        );
        rule.start_time = DateTime::from_timestamp(1720021526, 0).unwrap();
        rule.end_time = DateTime::from_timestamp(1720025126, 0).unwrap();
        assert_eq!(
            rule.details(),
            "1 1720021526 1720025126 portstate intf-regexp blaafjell-gw2 ge-1/0/10"
        );
    }

    #[test]
    fn test_started_and_ended_tracking() {
        let mut store = PlannedMaintenances::new();
        let now = Utc::now();
        store.create(
            now - Duration::minutes(1),
            now + Duration::hours(1),
            PmType::Device,
            MatchType::Exact,
            "a-gw".to_string(),
            None,
        );
        assert_eq!(store.started_since_last_run(now), vec![1]);
        store.last_run = Some(now);
        assert!(store.started_since_last_run(now + Duration::minutes(1)).is_empty());
        assert_eq!(
            store.ended_since_last_run(now + Duration::hours(2)),
            vec![1]
        );
    }
}
