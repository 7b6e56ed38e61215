//! Link state polling.
//!
//! Bulk-walks the interface table, applies the device's watch/ignore
//! patterns against interface descriptions, and materializes operational
//! state transitions as portstate events. Transitions feed the flap
//! tracker; while a port is flapping the existing event absorbs further
//! transitions instead of spawning new ones. Every observed transition
//! schedules a confirming single-interface poll, which is also the landing
//! point for trap-directed confirmation.

use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};

use zino_core::config::polldevs::PollDevice;
use zino_core::device::InterfaceState;
use zino_core::events::{EventData, FlapState, PortStateData};
use zino_core::flaps::PortIndex;
use zino_core::ZinoState;

use crate::engine::Engine;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::snmp::{mib, Oid, SnmpSession, SnmpValue};

/// Delay before a transition is re-verified with a single-interface poll.
pub const VERIFY_DELAY: Duration = Duration::from_secs(120);

fn poll_columns() -> [Oid; 5] {
    [
        Oid::from(mib::IF_DESCR),
        Oid::from(mib::IF_ALIAS),
        Oid::from(mib::IF_ADMIN_STATUS),
        Oid::from(mib::IF_OPER_STATUS),
        Oid::from(mib::IF_LAST_CHANGE),
    ]
}

#[derive(Debug)]
struct InterfaceRow {
    ifindex: u32,
    descr: Option<String>,
    alias: Option<String>,
    admin: Option<i64>,
    oper: Option<i64>,
    last_change: u64,
}

#[derive(Debug)]
struct Transition {
    ifindex: u32,
    descr: String,
    alias: String,
    old_state: InterfaceState,
    new_state: InterfaceState,
}

pub struct LinkStateTask<'a> {
    engine: &'a Engine,
    scheduler: &'a Scheduler,
    device: &'a PollDevice,
    watchpat: Option<Regex>,
    ignorepat: Option<Regex>,
}

impl<'a> LinkStateTask<'a> {
    pub fn new(engine: &'a Engine, scheduler: &'a Scheduler, device: &'a PollDevice) -> Self {
        let compile = |pattern: &Option<String>| {
            pattern.as_deref().and_then(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(device = %device.name, pattern = p, %err, "bad interface pattern");
                    None
                }
            })
        };
        Self {
            engine,
            scheduler,
            device,
            watchpat: compile(&device.watchpat),
            ignorepat: compile(&device.ignorepat),
        }
    }

    pub async fn run(&self, session: &dyn SnmpSession) -> Result<()> {
        let walked = session.sparse_walk(&poll_columns()).await?;
        let mut rows: Vec<InterfaceRow> = walked
            .into_iter()
            .filter_map(|(instance, values)| {
                let ifindex = *instance.as_slice().first()? ;
                Some(Self::decode_row(ifindex, &values))
            })
            .collect();
        // Deterministic event ordering when several ports moved in one walk.
        rows.sort_by_key(|row| row.ifindex);
        self.update_interfaces(rows)
    }

    /// Polls a single interface and runs it through the same update path.
    /// An ifindex of 0 re-polls the whole table.
    pub async fn poll_single_interface(&self, session: &dyn SnmpSession, ifindex: u32) -> Result<()> {
        if ifindex == 0 {
            return self.run(session).await;
        }
        let mut values = Vec::with_capacity(poll_columns().len());
        for column in poll_columns() {
            values.push(session.get(&column.with_suffix(&[ifindex])).await.ok());
        }
        let row = Self::decode_row(ifindex, &values);
        self.update_interfaces(vec![row])
    }

    fn decode_row(ifindex: u32, values: &[Option<SnmpValue>]) -> InterfaceRow {
        InterfaceRow {
            ifindex,
            descr: values[0].as_ref().and_then(|v| v.as_text()),
            alias: values[1].as_ref().and_then(|v| v.as_text()),
            admin: values[2].as_ref().and_then(|v| v.as_i64()),
            oper: values[3].as_ref().and_then(|v| v.as_i64()),
            last_change: values[4].as_ref().and_then(|v| v.as_u64()).unwrap_or(0),
        }
    }

    fn update_interfaces(&self, rows: Vec<InterfaceRow>) -> Result<()> {
        let mut verify = Vec::new();
        {
            let mut state = self.engine.state();
            for row in rows {
                if let Some(transition) = self.update_single_interface(&mut state, row)? {
                    verify.push(transition.ifindex);
                }
            }
        }
        for ifindex in verify {
            schedule_port_verification(
                self.engine,
                self.scheduler,
                self.device,
                ifindex,
                VERIFY_DELAY,
                "poll-observed",
            );
        }
        Ok(())
    }

    fn update_single_interface(
        &self,
        state: &mut ZinoState,
        row: InterfaceRow,
    ) -> Result<Option<Transition>> {
        let Some(descr) = row.descr.clone() else {
            debug!(device = %self.device.name, ifindex = row.ifindex, "interface row without ifDescr");
            return Ok(None);
        };

        let transition = {
            let dev = state.devices.get_or_create(&self.device.name);
            let port = dev.port_mut(row.ifindex);
            if port.ifdescr.as_deref() != Some(&descr) {
                port.ifdescr = Some(descr.clone());
            }
            if row.alias.is_some() && port.ifalias != row.alias {
                debug!(
                    device = %self.device.name,
                    ifindex = row.ifindex,
                    alias = ?row.alias,
                    "interface description changed"
                );
                port.ifalias = row.alias.clone();
            }
            port.last_change = Some(row.last_change);

            let alias = port.ifalias.clone().unwrap_or_default();
            if !self.is_interface_watched(&alias) {
                return Ok(None);
            }

            let (Some(admin), Some(oper)) = (row.admin, row.oper) else {
                return Ok(None);
            };
            let new_state = if admin == 2 {
                InterfaceState::AdminDown
            } else {
                InterfaceState::from_mib_value(oper)
            };
            port.admin_state = Some(if admin == 2 {
                InterfaceState::Down
            } else {
                InterfaceState::Up
            });

            // Report ports first seen oper-down (but admin-up) by seeding an
            // artificial unknown state for them.
            if port.state.is_none()
                && new_state != InterfaceState::Up
                && new_state != InterfaceState::AdminDown
            {
                port.state = Some(InterfaceState::Unknown);
            }

            let old_state = port.state;
            port.state = Some(new_state);
            match old_state {
                Some(old) if old != new_state => Some(Transition {
                    ifindex: row.ifindex,
                    descr,
                    alias,
                    old_state: old,
                    new_state,
                }),
                _ => None,
            }
        };

        let Some(transition) = transition else {
            return Ok(None);
        };
        self.record_transition(state, &transition)?;
        Ok(Some(transition))
    }

    fn record_transition(&self, state: &mut ZinoState, transition: &Transition) -> Result<()> {
        let port_index = PortIndex::new(&self.device.name, transition.ifindex);
        let went_down = matches!(
            transition.new_state,
            InterfaceState::Down | InterfaceState::LowerLayerDown | InterfaceState::AdminDown
        );
        let flapstate = state.flapping.update(&port_index, went_down);
        let flap_count = state.flapping.flap_count(&port_index);
        let ac_down = state
            .flapping
            .get(&port_index)
            .map(|h| h.down_ms(Utc::now()));

        let (mut event, created) = state.events.get_or_create(
            &self.device.name,
            EventData::Portstate(PortStateData {
                ifindex: transition.ifindex,
                ..Default::default()
            }),
        );

        let log_line = format!(
            "{}: port \"{}\" ix {} ({}) changed state from {} to {}",
            self.device.name,
            transition.descr,
            transition.ifindex,
            transition.alias,
            transition.old_state,
            transition.new_state,
        );
        info!("{log_line}");

        event.polladdr = Some(self.device.address);
        event.priority = self.device.priority;
        event.lasttrans = Some(Utc::now());
        event.flaps = Some(flap_count);
        event.ac_down = ac_down;
        if let EventData::Portstate(data) = &mut event.data {
            data.port = Some(transition.descr.clone());
            data.descr = Some(transition.alias.clone());
            data.flapstate = Some(flapstate);
            if flapstate == FlapState::Flapping && !created {
                // The event absorbs transitions while the port flaps; the
                // state attribute stays at the last stable observation.
                event.add_log(log_line);
                return state.commit_event(event).map_err(Into::into);
            }
            data.portstate = Some(transition.new_state);
        }
        event.add_log(log_line);
        state.commit_event(event).map_err(Into::into)
    }

    fn is_interface_watched(&self, alias: &str) -> bool {
        if let Some(watchpat) = &self.watchpat {
            if !watchpat.is_match(alias) {
                return false;
            }
        }
        if let Some(ignorepat) = &self.ignorepat {
            if ignorepat.is_match(alias) {
                return false;
            }
        }
        true
    }
}

/// Schedules a confirming single-interface poll; used both after observed
/// transitions and by link trap handling (trap-directed polling).
pub(crate) fn schedule_port_verification(
    engine: &Engine,
    scheduler: &Scheduler,
    device: &PollDevice,
    ifindex: u32,
    delay: Duration,
    reason: &str,
) {
    let name = format!("{}-verify-{}-state", device.name, ifindex);
    debug!(device = %device.name, ifindex, reason, "scheduling interface verification");
    let engine = engine.clone();
    let scheduler_owned = scheduler.clone();
    let device = device.clone();
    scheduler.enqueue_named(name, delay, async move {
        let slot = engine.session_slot(&device);
        let session = slot.lock().await;
        let task = LinkStateTask::new(&engine, &scheduler_owned, &device);
        if let Err(err) = task.poll_single_interface(session.as_ref(), ifindex).await {
            debug!(device = %device.name, ifindex, %err, "interface verification failed");
        }
    });
}
