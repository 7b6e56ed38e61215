//! BFD session monitoring.
//!
//! Walks the BFD session table and raises a bfd event whenever a session
//! leaves the up state (or disappears while up). Session discriminators key
//! both the cache and the event subindex. Reverse DNS for the far end is
//! resolved *before* the event is created, so a racing trap handler never
//! sees a half-filled event.

use std::collections::HashMap;

use tracing::debug;

use zino_core::config::polldevs::PollDevice;
use zino_core::device::{BfdSessState, BfdState};
use zino_core::events::{BfdData, EventData};

use crate::engine::Engine;
use crate::error::Result;
use crate::snmp::{mib, Oid, SnmpSession, SnmpValue};

pub struct BfdTask<'a> {
    engine: &'a Engine,
    device: &'a PollDevice,
}

impl<'a> BfdTask<'a> {
    pub fn new(engine: &'a Engine, device: &'a PollDevice) -> Self {
        Self { engine, device }
    }

    pub async fn run(&self, session: &dyn SnmpSession) -> Result<()> {
        let columns = [
            Oid::from(mib::BFD_SESS_STATE),
            Oid::from(mib::BFD_SESS_DISCRIMINATOR),
            Oid::from(mib::BFD_SESS_ADDR),
            Oid::from(mib::BFD_SESS_ADDR_TYPE),
        ];
        let walked = session.sparse_walk(&columns).await?;

        let mut polled: HashMap<u32, BfdState> = HashMap::new();
        for (instance, values) in walked {
            let session_index = instance.as_slice().first().copied();
            let Some(discr) = values[1].as_ref().and_then(|v| v.as_u64()).map(|v| v as u32)
            else {
                continue;
            };
            let Some(state_value) = values[0].as_ref().and_then(|v| v.as_i64()) else {
                continue;
            };
            polled.insert(
                discr,
                BfdState {
                    session_state: BfdSessState::from_mib_value(state_value),
                    session_index,
                    session_discr: Some(discr),
                    session_addr: values[2].as_ref().and_then(SnmpValue::as_ip),
                },
            );
        }

        // Sessions that vanished from the table while up count as lost.
        let cached: HashMap<u32, BfdState> = self
            .engine
            .state()
            .devices
            .get(&self.device.name)
            .map(|d| d.bfd_sessions.clone())
            .unwrap_or_default();
        let mut changes: Vec<(BfdState, BfdSessState)> = Vec::new();
        for (discr, new_state) in &polled {
            match cached.get(discr) {
                Some(old) if old.session_state != new_state.session_state => {
                    changes.push((new_state.clone(), old.session_state));
                }
                // First sighting never makes an event.
                _ => {}
            }
        }
        for (discr, old) in &cached {
            if !polled.contains_key(discr) && old.session_state == BfdSessState::Up {
                let mut lost = old.clone();
                lost.session_state = BfdSessState::NoSession;
                changes.push((lost, old.session_state));
            }
        }

        // Resolve names outside the state lock, before creating events.
        let mut rdns: HashMap<u32, String> = HashMap::new();
        for (new_state, _) in &changes {
            if let (Some(discr), Some(addr)) = (new_state.session_discr, new_state.session_addr) {
                if let Some(name) = self.engine.resolver.reverse_lookup(addr).await {
                    rdns.insert(discr, name);
                }
            }
        }

        let mut state = self.engine.state();
        for (new_state, old_state) in changes {
            let discr = new_state.session_discr.unwrap_or(0);
            let (mut event, _created) = state.events.get_or_create(
                &self.device.name,
                EventData::Bfd(BfdData {
                    bfd_discr: discr,
                    ifindex: None,
                    bfd_state: None,
                    bfd_ix: None,
                    bfd_addr: None,
                    neigh_rdns: None,
                }),
            );
            event.polladdr = Some(self.device.address);
            event.priority = self.device.priority;
            if let EventData::Bfd(data) = &mut event.data {
                data.bfd_state = Some(new_state.session_state);
                data.bfd_ix = new_state.session_index;
                data.bfd_addr = new_state.session_addr;
                if let Some(name) = rdns.get(&discr) {
                    data.neigh_rdns = Some(name.clone());
                }
            }
            let log = format!(
                "{}: BFD session {} changed state from {} to {}",
                self.device.name, discr, old_state, new_state.session_state
            );
            debug!("{log}");
            event.add_log(log);
            state.commit_event(event)?;
        }

        let dev = state.devices.get_or_create(&self.device.name);
        dev.bfd_sessions = polled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;
    use crate::engine::testutil::{device, sim_engine};
    use crate::snmp::sim::SimAgent;
    use std::sync::Arc;
    use zino_core::events::{EventState, SubIndex};

    const POLLFILE: &str = "name: example-gw\naddress: 10.0.42.1\n";

    fn seed_session(agent: &SimAgent, index: u32, discr: u32, state: i64) {
        agent.set_cell(mib::BFD_SESS_STATE, &[index], SnmpValue::Integer(state));
        agent.set_cell(
            mib::BFD_SESS_DISCRIMINATOR,
            &[index],
            SnmpValue::Integer(discr as i64),
        );
        agent.set_cell(
            mib::BFD_SESS_ADDR,
            &[index],
            SnmpValue::OctetString(vec![10, 0, 0, 2]),
        );
        agent.set_cell(mib::BFD_SESS_ADDR_TYPE, &[index], SnmpValue::Integer(1));
    }

    async fn run_task(engine: &Engine, dev: &PollDevice) {
        let slot = engine.session_slot(dev);
        let session = slot.lock().await;
        BfdTask::new(engine, dev).run(session.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_sighting_creates_no_event() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "example-gw");
        seed_session(&backend.agent("example-gw"), 1, 4242, 4);

        run_task(&engine, &dev).await;

        let state = engine.state();
        assert_eq!(state.events.iter_open().count(), 0);
        assert_eq!(
            state.devices.get("example-gw").unwrap().bfd_sessions[&4242].session_state,
            BfdSessState::Up
        );
    }

    #[tokio::test]
    async fn test_session_leaving_up_creates_event_with_rdns() {
        let (mut engine, backend) = sim_engine(POLLFILE);
        engine.resolver = Arc::new(
            StaticResolver::default().with("10.0.0.2".parse().unwrap(), "peer.example.org"),
        );
        let dev = device(&engine, "example-gw");
        let agent = backend.agent("example-gw");
        seed_session(&agent, 1, 4242, 4);
        run_task(&engine, &dev).await;

        seed_session(&agent, 1, 4242, 2); // down
        run_task(&engine, &dev).await;

        let state = engine.state();
        let event = state.events.iter_open().next().expect("bfd event");
        assert_eq!(event.state, EventState::Open);
        assert_eq!(event.subindex(), SubIndex::BfdSession(4242));
        match &event.data {
            EventData::Bfd(data) => {
                assert_eq!(data.bfd_state, Some(BfdSessState::Down));
                assert_eq!(data.neigh_rdns.as_deref(), Some("peer.example.org"));
                assert_eq!(data.bfd_addr, Some("10.0.0.2".parse().unwrap()));
            }
            other => panic!("wrong event data: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_vanished_up_session_is_reported() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "example-gw");
        let agent = backend.agent("example-gw");
        seed_session(&agent, 1, 4242, 4);
        run_task(&engine, &dev).await;

        for column in [
            mib::BFD_SESS_STATE,
            mib::BFD_SESS_DISCRIMINATOR,
            mib::BFD_SESS_ADDR,
            mib::BFD_SESS_ADDR_TYPE,
        ] {
            agent.remove(&Oid::from(column).with_suffix(&[1]));
        }
        run_task(&engine, &dev).await;

        let state = engine.state();
        let event = state.events.iter_open().next().expect("bfd event");
        match &event.data {
            EventData::Bfd(data) => {
                assert_eq!(data.bfd_state, Some(BfdSessState::NoSession));
            }
            other => panic!("wrong event data: {other:?}"),
        }
    }
}
