//! BFD trap handling.
//!
//! Session state traps update the BFD cache and trigger a confirming BFD
//! poll. Reverse DNS for the session address is done here so the poll's
//! event creation finds it ready.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use zino_core::device::{BfdSessState, BfdState};

use super::{TrapMessage, TrapObserver};
use crate::engine::Engine;
use crate::scheduler::Scheduler;
use crate::snmp::{mib, Oid, SnmpValue};
use crate::tasks::{self, TaskKind};

pub struct BfdTrapObserver {
    engine: Engine,
    scheduler: Scheduler,
}

impl BfdTrapObserver {
    pub fn new(engine: Engine, scheduler: Scheduler) -> Self {
        Self { engine, scheduler }
    }
}

#[async_trait]
impl TrapObserver for BfdTrapObserver {
    fn wanted_traps(&self) -> Vec<Oid> {
        vec![
            Oid::from(mib::TRAP_BFD_SESS_UP),
            Oid::from(mib::TRAP_BFD_SESS_DOWN),
        ]
    }

    async fn handle_trap(&self, trap: &TrapMessage, device_name: &str) -> bool {
        let Some(discr) = trap
            .get_column(mib::BFD_SESS_DISCRIMINATOR)
            .and_then(|vb| vb.value.as_u64())
            .map(|v| v as u32)
        else {
            debug!(device = %device_name, "BFD trap without discriminator");
            return true;
        };
        let new_state = if trap.trap_oid == Oid::from(mib::TRAP_BFD_SESS_UP) {
            BfdSessState::Up
        } else {
            BfdSessState::Down
        };
        let addr = trap
            .get_column(mib::BFD_SESS_ADDR)
            .and_then(|vb| vb.value.as_ip());

        // Resolve before touching state, so a subsequent poll-created event
        // does not race the lookup.
        if let Some(addr) = addr {
            let _ = self.engine.resolver.reverse_lookup(addr).await;
        }

        {
            let mut state = self.engine.state();
            let dev = state.devices.get_or_create(device_name);
            dev.bfd_sessions
                .entry(discr)
                .and_modify(|s| {
                    s.session_state = new_state;
                    if addr.is_some() {
                        s.session_addr = addr;
                    }
                })
                .or_insert(BfdState {
                    session_state: new_state,
                    session_index: None,
                    session_discr: Some(discr),
                    session_addr: addr,
                });
            debug!(device = %device_name, discr, state = %new_state, "BFD trap noted");
        }

        if let Some(device) = self.engine.device(device_name) {
            let name = format!("{}-bfd-confirm", device.name);
            let engine = self.engine.clone();
            let scheduler = self.scheduler.clone();
            self.scheduler.enqueue_named(name, Duration::ZERO, async move {
                if let Err(err) = tasks::run_task(&engine, &scheduler, &device, TaskKind::Bfd).await
                {
                    debug!(device = %device.name, %err, "confirming BFD poll failed");
                }
            });
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::sim_engine;
    use crate::trapd::TrapVarBind;

    const POLLFILE: &str = "name: example-gw\naddress: 10.0.42.1\n";

    #[tokio::test]
    async fn test_sess_down_trap_updates_cache_and_confirms() {
        let (engine, _) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let observer = BfdTrapObserver::new(engine.clone(), scheduler.clone());

        let trap = TrapMessage {
            source: "10.0.42.1".parse().unwrap(),
            source_port: 162,
            community: "public".to_string(),
            trap_oid: Oid::from(mib::TRAP_BFD_SESS_DOWN),
            varbinds: vec![TrapVarBind {
                oid: Oid::from(mib::BFD_SESS_DISCRIMINATOR).with_suffix(&[1]),
                value: SnmpValue::Integer(4242),
            }],
        };
        observer.handle_trap(&trap, "example-gw").await;

        let state = engine.state();
        assert_eq!(
            state.devices.get("example-gw").unwrap().bfd_sessions[&4242].session_state,
            BfdSessState::Down
        );
        drop(state);
        assert!(scheduler
            .pending_one_shots()
            .contains(&"example-gw-bfd-confirm".to_string()));
        scheduler.cancel_all();
    }
}
