//! Link trap handling.
//!
//! linkUp/linkDown traps update the port cache, feed the flap tracker and
//! create or update the portstate event immediately, then schedule a
//! confirming single-interface poll. While a port is flapping, transitions
//! only bump the event's flap counter.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use zino_core::device::InterfaceState;
use zino_core::events::{EventData, FlapState, PortStateData};
use zino_core::flaps::PortIndex;

use super::{TrapMessage, TrapObserver};
use crate::engine::Engine;
use crate::scheduler::Scheduler;
use crate::snmp::{mib, Oid};
use crate::tasks;

pub struct LinkTrapObserver {
    engine: Engine,
    scheduler: Scheduler,
}

impl LinkTrapObserver {
    pub fn new(engine: Engine, scheduler: Scheduler) -> Self {
        Self { engine, scheduler }
    }

    fn handle_link_transition(&self, trap: &TrapMessage, device_name: &str, is_up: bool) {
        let Some(ifindex) = trap
            .get_column(mib::IF_INDEX)
            .and_then(|vb| vb.value.as_u64())
            .map(|v| v as u32)
        else {
            debug!(device = %device_name, "link trap without ifIndex");
            return;
        };

        let new_state = if is_up {
            InterfaceState::Up
        } else {
            InterfaceState::Down
        };

        let mut state = self.engine.state();
        let (descr, alias, old_state) = {
            let dev = state.devices.get_or_create(device_name);
            let port = dev.port_mut(ifindex);
            let old = port.state;
            port.state = Some(new_state);
            (
                port.ifdescr.clone().unwrap_or_default(),
                port.ifalias.clone().unwrap_or_default(),
                old,
            )
        };

        if old_state == Some(new_state) {
            debug!(device = %device_name, ifindex, state = %new_state, "link trap repeats known state");
            return;
        }

        let port_index = PortIndex::new(device_name, ifindex);
        let flapstate = state.flapping.update(&port_index, !is_up);
        let flap_count = state.flapping.flap_count(&port_index);
        let ac_down = state.flapping.get(&port_index).map(|h| h.down_ms(Utc::now()));

        let (mut event, created) = state.events.get_or_create(
            device_name,
            EventData::Portstate(PortStateData {
                ifindex,
                ..Default::default()
            }),
        );
        if let Some(device) = self.engine.device(device_name) {
            event.polladdr = Some(device.address);
            event.priority = device.priority;
        }
        event.lasttrans = Some(Utc::now());
        event.flaps = Some(flap_count);
        event.ac_down = ac_down;
        let log_line = format!(
            "{device_name}: port \"{descr}\" ix {ifindex} ({alias}) link trap, state {new_state}"
        );
        if let EventData::Portstate(data) = &mut event.data {
            data.port = Some(descr);
            data.descr = Some(alias);
            data.flapstate = Some(flapstate);
            if flapstate != FlapState::Flapping || created {
                data.portstate = Some(new_state);
            }
        }
        event.add_log(log_line);
        if let Err(err) = state.commit_event(event) {
            debug!(device = %device_name, ifindex, %err, "link trap event commit failed");
        }
        drop(state);

        // Trap-directed polling: let the poller confirm what the trap says.
        if let Some(device) = self.engine.device(device_name) {
            tasks::schedule_port_verification(
                &self.engine,
                &self.scheduler,
                &device,
                ifindex,
                tasks::VERIFY_DELAY,
                "trap-triggered",
            );
        }
    }
}

#[async_trait]
impl TrapObserver for LinkTrapObserver {
    fn wanted_traps(&self) -> Vec<Oid> {
        vec![Oid::from(mib::TRAP_LINK_UP), Oid::from(mib::TRAP_LINK_DOWN)]
    }

    async fn handle_trap(&self, trap: &TrapMessage, device_name: &str) -> bool {
        let is_up = trap.trap_oid == Oid::from(mib::TRAP_LINK_UP);
        self.handle_link_transition(trap, device_name, is_up);
        false
    }
}
