//! BGP peering state monitoring.
//!
//! A device speaks one of three BGP MIB dialects (Juniper BGP4-V2, Cisco,
//! or plain RFC 4273); the first successful probe selects the dialect and
//! caches it. Each run walks the peer table and raises/updates a bgp event
//! whenever a peer leaves established, is administratively stopped, or
//! comes back after an external reset. Internal-AS peers are not observed.

use std::net::IpAddr;

use tracing::{debug, info};

use zino_core::config::polldevs::PollDevice;
use zino_core::device::{BgpAdminStatus, BgpOperState, BgpPeerSession, BgpStyle};
use zino_core::events::{BgpData, EventData, EventKey, EventKind, SubIndex};
use zino_core::ZinoState;

use crate::engine::Engine;
use crate::error::Result;
use crate::snmp::{mib, Oid, SnmpSession, SnmpValue, SparseWalk};

/// A device must have been up this long before a down peer is flagged;
/// young uptimes mean the router itself just booted.
const MIN_UPTIME_SECONDS: u64 = 600;

#[derive(Debug, Clone)]
struct BgpRow {
    remote_addr: IpAddr,
    remote_as: Option<u32>,
    oper: BgpOperState,
    admin: BgpAdminStatus,
    established_time: u32,
}

pub struct BgpStateMonitorTask<'a> {
    engine: &'a Engine,
    device: &'a PollDevice,
}

impl<'a> BgpStateMonitorTask<'a> {
    pub fn new(engine: &'a Engine, device: &'a PollDevice) -> Self {
        Self { engine, device }
    }

    pub async fn run(&self, session: &dyn SnmpSession) -> Result<()> {
        let style = match self.resolve_style(session).await? {
            Some(style) => style,
            None => return Ok(()),
        };
        let Some(local_as) = self.get_local_as(session, style).await else {
            debug!(device = %self.device.name, "no local AS, skipping BGP run");
            return Ok(());
        };
        let uptime_secs = session
            .get(&Oid::from(mib::SYS_UPTIME))
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .map(|ticks| ticks / 100)
            .unwrap_or(0);

        let rows = self.walk_peers(session, style).await?;
        let mut state = self.engine.state();
        for row in rows {
            self.update_single_peer(&mut state, row, local_as, uptime_secs)?;
        }
        Ok(())
    }

    /// Probes which MIB dialect the device speaks, caching the answer.
    async fn resolve_style(&self, session: &dyn SnmpSession) -> Result<Option<BgpStyle>> {
        if let Some(style) = self
            .engine
            .state()
            .devices
            .get(&self.device.name)
            .and_then(|d| d.bgp_style)
        {
            return Ok(Some(style));
        }

        let probes = [
            (Oid::from(mib::JNX_BGP_M2), BgpStyle::Juniper),
            (Oid::from(mib::CBGP_PEER2_TABLE), BgpStyle::Cisco),
            (Oid::from(mib::BGP4_MIB), BgpStyle::General),
        ];
        for (root, style) in probes {
            if let Ok(next) = session.get_next(&root).await {
                if next.oid.starts_with(&root) {
                    info!(device = %self.device.name, %style, "selected BGP MIB dialect");
                    self.engine
                        .state()
                        .devices
                        .get_or_create(&self.device.name)
                        .bgp_style = Some(style);
                    return Ok(Some(style));
                }
            }
        }
        debug!(device = %self.device.name, "no BGP MIBs answered");
        Ok(None)
    }

    async fn get_local_as(&self, session: &dyn SnmpSession, style: BgpStyle) -> Option<u32> {
        let value = match style {
            BgpStyle::General => session.get(&Oid::from(mib::BGP_LOCAL_AS)).await.ok()?,
            BgpStyle::Cisco => session.get(&Oid::from(mib::CBGP_LOCAL_AS)).await.ok()?,
            BgpStyle::Juniper => {
                // Juniper keeps one entry per peer; take the first.
                let next = session
                    .get_next(&Oid::from(mib::JNX_BGP_M2_PEER_LOCAL_AS))
                    .await
                    .ok()?;
                if !next.oid.starts_with(&Oid::from(mib::JNX_BGP_M2_PEER_LOCAL_AS)) {
                    return None;
                }
                next.value
            }
        };
        value.as_u64().map(|v| v as u32)
    }

    async fn walk_peers(&self, session: &dyn SnmpSession, style: BgpStyle) -> Result<Vec<BgpRow>> {
        let columns: Vec<Oid> = match style {
            BgpStyle::General => vec![
                Oid::from(mib::BGP_PEER_STATE),
                Oid::from(mib::BGP_PEER_ADMIN_STATUS),
                Oid::from(mib::BGP_PEER_REMOTE_AS),
                Oid::from(mib::BGP_PEER_FSM_ESTABLISHED_TIME),
                Oid::from(mib::BGP_PEER_REMOTE_ADDR),
            ],
            BgpStyle::Juniper => vec![
                Oid::from(mib::JNX_BGP_M2_PEER_STATE),
                Oid::from(mib::JNX_BGP_M2_PEER_STATUS),
                Oid::from(mib::JNX_BGP_M2_PEER_REMOTE_AS),
                Oid::from(mib::JNX_BGP_M2_PEER_FSM_ESTABLISHED_TIME),
                Oid::from(mib::JNX_BGP_M2_PEER_REMOTE_ADDR),
            ],
            BgpStyle::Cisco => vec![
                Oid::from(mib::CBGP_PEER2_STATE),
                Oid::from(mib::CBGP_PEER2_ADMIN_STATUS),
                Oid::from(mib::CBGP_PEER2_REMOTE_AS),
                Oid::from(mib::CBGP_PEER2_FSM_ESTABLISHED_TIME),
            ],
        };
        let walked = session.sparse_walk(&columns).await?;
        Ok(Self::decode_rows(walked, style))
    }

    fn decode_rows(walked: SparseWalk, style: BgpStyle) -> Vec<BgpRow> {
        let mut rows = Vec::new();
        for (instance, values) in walked {
            let remote_addr = match style {
                // Cisco indexes the table by address type and address.
                BgpStyle::Cisco => ip_from_instance(instance.as_slice()),
                _ => values
                    .get(4)
                    .and_then(|v| v.as_ref())
                    .and_then(SnmpValue::as_ip),
            };
            let Some(remote_addr) = remote_addr else {
                continue;
            };
            let Some(oper) = values[0].as_ref().and_then(|v| v.as_i64()) else {
                continue;
            };
            let admin = values[1]
                .as_ref()
                .and_then(|v| v.as_i64())
                .map(BgpAdminStatus::from_mib_value)
                .unwrap_or(BgpAdminStatus::Unknown);
            rows.push(BgpRow {
                remote_addr,
                remote_as: values[2].as_ref().and_then(|v| v.as_u64()).map(|v| v as u32),
                oper: BgpOperState::from_mib_value(oper),
                admin,
                established_time: values[3]
                    .as_ref()
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            });
        }
        rows
    }

    fn update_single_peer(
        &self,
        state: &mut ZinoState,
        row: BgpRow,
        local_as: u32,
        uptime_secs: u64,
    ) -> Result<()> {
        // JunOS spills IPv6 session info over as 0.0.0.0; old IOS leaks
        // 32.1.7.0. Neither is a real peer.
        let bogus = [IpAddr::from([0, 0, 0, 0]), IpAddr::from([32, 1, 7, 0])];
        if bogus.contains(&row.remote_addr) {
            return Ok(());
        }
        if row.remote_as == Some(local_as) {
            return Ok(());
        }

        let cached = state
            .devices
            .get(&self.device.name)
            .and_then(|d| d.bgp_peers.get(&row.remote_addr))
            .cloned();

        if row.oper == BgpOperState::Established {
            let externally_reset = cached
                .as_ref()
                .map(|c| c.uptime > row.established_time)
                .unwrap_or(false);
            let event_says_down = {
                let key = EventKey {
                    router: self.device.name.clone(),
                    subindex: SubIndex::Peer(row.remote_addr),
                    kind: EventKind::Bgp,
                };
                state.events.lookup(&key).is_some_and(|event| {
                    matches!(&event.data, EventData::Bgp(d) if d.bgp_os != Some(BgpOperState::Established))
                })
            };
            if externally_reset || event_says_down {
                let log = format!(
                    "{} peer {} AS {} was reset (now up)",
                    self.device.name,
                    row.remote_addr,
                    row.remote_as.unwrap_or(0)
                );
                self.update_event(state, &row, &log)?;
            }
        } else if row.admin.is_down() {
            let admin_changed = cached
                .as_ref()
                .and_then(|c| c.admin_status)
                .map(|a| a != row.admin)
                .unwrap_or(true);
            if admin_changed {
                let log = format!(
                    "{} peer {} AS {} is turned off ({})",
                    self.device.name,
                    row.remote_addr,
                    row.remote_as.unwrap_or(0),
                    row.admin
                );
                self.update_event(state, &row, &log)?;
            }
        } else {
            let was_established = cached
                .as_ref()
                .and_then(|c| c.oper_state)
                .map(|o| o == BgpOperState::Established)
                .unwrap_or(true);
            if was_established {
                if uptime_secs > MIN_UPTIME_SECONDS {
                    let log = format!(
                        "{} peer {} AS {} is down ({})",
                        self.device.name,
                        row.remote_addr,
                        row.remote_as.unwrap_or(0),
                        row.oper
                    );
                    self.update_event(state, &row, &log)?;
                } else {
                    debug!(
                        device = %self.device.name,
                        peer = %row.remote_addr,
                        uptime_secs,
                        "peer down but device recently booted, not flagging"
                    );
                }
            }
        }

        let dev = state.devices.get_or_create(&self.device.name);
        dev.bgp_peers.insert(
            row.remote_addr,
            BgpPeerSession {
                uptime: row.established_time,
                admin_status: Some(row.admin),
                oper_state: Some(row.oper),
                remote_as: row.remote_as,
            },
        );
        Ok(())
    }

    fn update_event(&self, state: &mut ZinoState, row: &BgpRow, log: &str) -> Result<()> {
        let (mut event, _created) = state.events.get_or_create(
            &self.device.name,
            EventData::Bgp(BgpData {
                remote_addr: row.remote_addr,
                remote_as: None,
                peer_uptime: None,
                bgp_os: None,
                bgp_as: None,
            }),
        );
        event.polladdr = Some(self.device.address);
        event.priority = self.device.priority;
        event.lastevent = Some(log.to_string());
        if let EventData::Bgp(data) = &mut event.data {
            data.remote_as = row.remote_as;
            data.peer_uptime = Some(row.established_time);
            data.bgp_os = Some(row.oper);
            data.bgp_as = Some(row.admin);
        }
        event.add_log(log);
        info!("{log}");
        state.commit_event(event).map_err(Into::into)
    }
}

/// Extracts the peer address from a Cisco cbgpPeer2 table instance:
/// `<addrtype>.<len>.<addr bytes...>`.
fn ip_from_instance(instance: &[u32]) -> Option<IpAddr> {
    if instance.len() < 2 {
        return None;
    }
    let len = instance[1] as usize;
    let bytes: Vec<u8> = instance
        .get(2..2 + len)?
        .iter()
        .map(|&part| part as u8)
        .collect();
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes.as_slice()).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes.as_slice()).ok().map(IpAddr::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{device, sim_engine};
    use crate::snmp::sim::SimAgent;
    use zino_core::events::EventState;

    const POLLFILE: &str = "name: auroralane-gw1\naddress: 10.0.42.2\n";
    const PEER: [u32; 4] = [10, 0, 0, 1];

    fn seed_general_peer(agent: &SimAgent, oper: i64, admin: i64, established: u32) {
        agent.set(mib::SYS_UPTIME, SnmpValue::TimeTicks(7_200_00 * 100));
        agent.set(mib::BGP_LOCAL_AS, SnmpValue::Integer(64512));
        agent.set_cell(mib::BGP_PEER_STATE, &PEER, SnmpValue::Integer(oper));
        agent.set_cell(mib::BGP_PEER_ADMIN_STATUS, &PEER, SnmpValue::Integer(admin));
        agent.set_cell(mib::BGP_PEER_REMOTE_AS, &PEER, SnmpValue::Integer(100));
        agent.set_cell(
            mib::BGP_PEER_FSM_ESTABLISHED_TIME,
            &PEER,
            SnmpValue::TimeTicks(established),
        );
        agent.set_cell(
            mib::BGP_PEER_REMOTE_ADDR,
            &PEER,
            SnmpValue::IpAddress("10.0.0.1".parse().unwrap()),
        );
    }

    async fn run_task(engine: &Engine, dev: &PollDevice) {
        let slot = engine.session_slot(dev);
        let session = slot.lock().await;
        BgpStateMonitorTask::new(engine, dev)
            .run(session.as_ref())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_established_peer_creates_no_event() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "auroralane-gw1");
        seed_general_peer(&backend.agent("auroralane-gw1"), 6, 2, 1000);

        run_task(&engine, &dev).await;

        let state = engine.state();
        assert_eq!(state.events.iter_open().count(), 0);
        let peers = &state.devices.get("auroralane-gw1").unwrap().bgp_peers;
        assert_eq!(
            peers[&"10.0.0.1".parse::<IpAddr>().unwrap()].oper_state,
            Some(BgpOperState::Established)
        );
    }

    #[tokio::test]
    async fn test_peer_leaving_established_creates_event() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "auroralane-gw1");
        let agent = backend.agent("auroralane-gw1");
        seed_general_peer(&agent, 3, 2, 0); // active, admin start

        run_task(&engine, &dev).await;

        let state = engine.state();
        let event = state.events.iter_open().next().expect("bgp event");
        assert_eq!(event.state, EventState::Open);
        match &event.data {
            EventData::Bgp(data) => {
                assert_eq!(data.remote_as, Some(100));
                assert_eq!(data.bgp_os, Some(BgpOperState::Active));
            }
            other => panic!("wrong event data: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reestablished_peer_does_not_close_event() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "auroralane-gw1");
        let agent = backend.agent("auroralane-gw1");
        seed_general_peer(&agent, 3, 2, 0);
        run_task(&engine, &dev).await;

        seed_general_peer(&agent, 6, 2, 60);
        run_task(&engine, &dev).await;

        let state = engine.state();
        let event = state.events.iter_open().next().expect("event still open");
        assert_eq!(event.state, EventState::Open);
        match &event.data {
            EventData::Bgp(data) => {
                assert_eq!(data.bgp_os, Some(BgpOperState::Established));
            }
            other => panic!("wrong event data: {other:?}"),
        }
        assert!(event
            .log
            .iter()
            .any(|l| l.message.contains("was reset (now up)")));
    }

    #[tokio::test]
    async fn test_internal_as_peers_are_not_observed() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "auroralane-gw1");
        let agent = backend.agent("auroralane-gw1");
        seed_general_peer(&agent, 3, 2, 0);
        agent.set_cell(mib::BGP_PEER_REMOTE_AS, &PEER, SnmpValue::Integer(64512));

        run_task(&engine, &dev).await;
        assert_eq!(engine.state().events.iter_open().count(), 0);
    }

    #[tokio::test]
    async fn test_admin_stopped_peer_is_reported_once() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "auroralane-gw1");
        let agent = backend.agent("auroralane-gw1");
        seed_general_peer(&agent, 1, 1, 0); // idle, admin stop

        run_task(&engine, &dev).await;
        run_task(&engine, &dev).await;

        let state = engine.state();
        let event = state.events.iter_open().next().expect("bgp event");
        assert!(event
            .log
            .iter()
            .any(|l| l.message.contains("is turned off (stop)")));
        // The second identical run added nothing.
        let turned_off_lines = event
            .log
            .iter()
            .filter(|l| l.message.contains("turned off"))
            .count();
        assert_eq!(turned_off_lines, 1);
    }

    #[tokio::test]
    async fn test_young_uptime_suppresses_down_flag() {
        let (engine, backend) = sim_engine(POLLFILE);
        let dev = device(&engine, "auroralane-gw1");
        let agent = backend.agent("auroralane-gw1");
        seed_general_peer(&agent, 3, 2, 0);
        agent.set(mib::SYS_UPTIME, SnmpValue::TimeTicks(30 * 100)); // 30s up

        run_task(&engine, &dev).await;
        assert_eq!(engine.state().events.iter_open().count(), 0);
    }
}
