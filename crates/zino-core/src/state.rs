//! The aggregate runtime state of a Zino process.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::Utc;
use tracing::{debug, info};

use crate::device::DeviceStates;
use crate::error::Result;
use crate::events::{Event, EventState, Events};
use crate::flaps::FlappingStates;
use crate::pm::PlannedMaintenances;

/// Holds all state that Zino needs to persist between runtimes.
///
/// The daemon keeps exactly one of these behind its lock and passes it as an
/// explicit context to tasks and protocol handlers; entities reference each
/// other by id so the snapshot stays acyclic.
#[derive(Debug, Default)]
pub struct ZinoState {
    pub devices: DeviceStates,
    pub events: Events,
    pub planned_maintenances: PlannedMaintenances,
    pub flapping: FlappingStates,
    /// Maps known source addresses to device names, for trap dispatch.
    pub addresses: HashMap<IpAddr, String>,
}

impl ZinoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits an event after evaluating active planned maintenances.
    ///
    /// Active PMs are checked in id-ascending order; the first match
    /// annotates the event, and a brand-new event matched by a PM is
    /// committed straight into the ignored state instead of open. Observer
    /// notifications are emitted either way.
    pub fn commit_event(&mut self, mut event: Event) -> Result<()> {
        let now = Utc::now();
        let is_new = event.state == EventState::Embryonic;

        let mut suppress = false;
        if event.pm.is_none() {
            let matched = self
                .planned_maintenances
                .active(now)
                .find(|pm| pm.matches_event(&event, &self.devices))
                .map(|pm| pm.id);
            if let Some(pm_id) = matched {
                event.pm = Some(pm_id);
                event.add_log(format!("planned maintenance {pm_id} matches this event"));
                suppress = is_new;
                if let Some(pm) = self.planned_maintenances.get_mut(pm_id) {
                    if !pm.event_ids.contains(&event.id) {
                        pm.event_ids.push(event.id);
                    }
                }
                debug!(event = event.id, pm = pm_id, "event matched planned maintenance");
            }
        }

        if suppress {
            self.events.commit_as(event, EventState::Ignored)
        } else {
            self.events.commit(event)
        }
    }

    /// Force-closes all events belonging to a device that left the pollfile.
    pub fn close_events_for_device(&mut self, device_name: &str, user: &str) -> Result<usize> {
        let ids: Vec<u32> = self
            .events
            .iter_all()
            .filter(|e| e.router == device_name && e.state != EventState::Closed)
            .map(|e| e.id)
            .collect();
        for &id in &ids {
            self.events
                .close(id, &format!("device {device_name} removed from pollfile"), user)?;
        }
        if !ids.is_empty() {
            info!(device = device_name, count = ids.len(), "force-closed events for removed device");
        }
        Ok(ids.len())
    }

    /// Records an address as belonging to a device, for trap source lookup.
    pub fn note_device_address(&mut self, device_name: &str, address: IpAddr) {
        self.addresses.insert(address, device_name.to_string());
        let device = self.devices.get_or_create(device_name);
        if !device.addresses.contains(&address) {
            device.addresses.push(address);
        }
    }

    /// Resolves a trap source address to a device name.
    pub fn device_for_address(&self, address: IpAddr) -> Option<&str> {
        self.addresses.get(&address).map(String::as_str)
    }
}
