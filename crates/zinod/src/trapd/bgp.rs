//! BGP trap handling.
//!
//! Transition traps only update the cached peer state and trigger a
//! confirming BGP poll; the poll is what creates or updates events, so a
//! spoofed or stale trap cannot fabricate an incident on its own.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use zino_core::device::{BgpOperState, BgpPeerSession};

use super::{TrapMessage, TrapObserver};
use crate::engine::Engine;
use crate::scheduler::Scheduler;
use crate::snmp::{mib, Oid, SnmpValue};
use crate::tasks::{self, TaskKind};

pub struct BgpTrapObserver {
    engine: Engine,
    scheduler: Scheduler,
}

impl BgpTrapObserver {
    pub fn new(engine: Engine, scheduler: Scheduler) -> Self {
        Self { engine, scheduler }
    }

    fn parse_peer(&self, trap: &TrapMessage) -> Option<(IpAddr, BgpOperState)> {
        let peer = trap
            .get_column(mib::JNX_BGP_M2_PEER_REMOTE_ADDR)
            .or_else(|| trap.get_column(mib::BGP_PEER_REMOTE_ADDR))
            .and_then(|vb| vb.value.as_ip())?;
        let state = trap
            .get_column(mib::JNX_BGP_M2_PEER_STATE)
            .or_else(|| trap.get_column(mib::BGP_PEER_STATE))
            .and_then(|vb| vb.value.as_i64())
            .map(BgpOperState::from_mib_value)?;
        Some((peer, state))
    }

    fn schedule_confirming_poll(&self, device_name: &str) {
        let Some(device) = self.engine.device(device_name) else {
            return;
        };
        let name = format!("{}-bgp-confirm", device.name);
        let engine = self.engine.clone();
        let scheduler = self.scheduler.clone();
        self.scheduler.enqueue_named(name, Duration::ZERO, async move {
            if let Err(err) = tasks::run_task(&engine, &scheduler, &device, TaskKind::Bgp).await {
                debug!(device = %device.name, %err, "confirming BGP poll failed");
            }
        });
    }
}

#[async_trait]
impl TrapObserver for BgpTrapObserver {
    fn wanted_traps(&self) -> Vec<Oid> {
        vec![
            Oid::from(mib::TRAP_BGP_ESTABLISHED),
            Oid::from(mib::TRAP_BGP_BACKWARD_TRANSITION),
            Oid::from(mib::TRAP_JNX_BGP_M2_ESTABLISHED),
            Oid::from(mib::TRAP_JNX_BGP_M2_BACKWARD_TRANSITION),
        ]
    }

    async fn handle_trap(&self, trap: &TrapMessage, device_name: &str) -> bool {
        let Some((peer, new_state)) = self.parse_peer(trap) else {
            debug!(device = %device_name, "BGP trap missing peer variables");
            return true;
        };

        {
            let mut state = self.engine.state();
            let dev = state.devices.get_or_create(device_name);
            let session = dev.bgp_peers.entry(peer).or_insert_with(BgpPeerSession::default);
            let prev = session.oper_state;
            session.oper_state = Some(new_state);
            if new_state != BgpOperState::Established
                && prev == Some(BgpOperState::Established)
            {
                info!(device = %device_name, %peer, state = %new_state, "lost BGP peer");
            } else if new_state == BgpOperState::Established {
                info!(device = %device_name, %peer, "BGP peer up");
            }
        }

        self.schedule_confirming_poll(device_name);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::sim_engine;
    use crate::trapd::TrapVarBind;

    const POLLFILE: &str = "name: auroralane-gw1\naddress: 10.0.42.2\n";

    fn bgp_trap(state: i64) -> TrapMessage {
        TrapMessage {
            source: "10.0.42.2".parse().unwrap(),
            source_port: 162,
            community: "public".to_string(),
            trap_oid: Oid::from(mib::TRAP_JNX_BGP_M2_BACKWARD_TRANSITION),
            varbinds: vec![
                TrapVarBind {
                    oid: Oid::from(mib::JNX_BGP_M2_PEER_REMOTE_ADDR).with_suffix(&[1]),
                    value: SnmpValue::OctetString(vec![10, 0, 0, 1]),
                },
                TrapVarBind {
                    oid: Oid::from(mib::JNX_BGP_M2_PEER_STATE).with_suffix(&[1]),
                    value: SnmpValue::Integer(state),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_backward_transition_updates_cache_and_confirms() {
        let (engine, _) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let observer = BgpTrapObserver::new(engine.clone(), scheduler.clone());

        observer.handle_trap(&bgp_trap(3), "auroralane-gw1").await;

        let state = engine.state();
        let peers = &state.devices.get("auroralane-gw1").unwrap().bgp_peers;
        assert_eq!(
            peers[&"10.0.0.1".parse::<IpAddr>().unwrap()].oper_state,
            Some(BgpOperState::Active)
        );
        drop(state);
        // The trap itself created no event; a confirming poll is queued.
        assert_eq!(engine.state().events.iter_open().count(), 0);
        assert!(scheduler
            .pending_one_shots()
            .contains(&"auroralane-gw1-bgp-confirm".to_string()));
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_trap_without_variables_is_offered_onward() {
        let (engine, _) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let observer = BgpTrapObserver::new(engine.clone(), scheduler.clone());
        let bare = TrapMessage {
            varbinds: Vec::new(),
            ..bgp_trap(3)
        };
        assert!(observer.handle_trap(&bare, "auroralane-gw1").await);
        scheduler.cancel_all();
    }
}
