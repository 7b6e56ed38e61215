//! In-memory SNMP backend.
//!
//! Each simulated device is a sorted OID/value table. Sessions resolve
//! against the table, trap injection feeds the same channel a wire receiver
//! would, and the uptime agent is served by direct dispatch. The test-suite
//! builds entire poll cycles on top of this.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use zino_core::config::polldevs::PollDevice;
use zino_core::config::AgentConfiguration;

use super::agent::UptimeAgent;
use super::{Oid, SnmpBackend, SnmpError, SnmpResult, SnmpSession, SnmpValue, SparseWalk, VarBind};
use crate::trapd::TrapMessage;

/// One simulated SNMP agent.
#[derive(Default, Debug)]
pub struct SimAgent {
    values: Mutex<BTreeMap<Oid, SnmpValue>>,
    unreachable: AtomicBool,
}

impl SimAgent {
    /// Sets a single object value.
    pub fn set(&self, oid: impl Into<Oid>, value: SnmpValue) {
        self.values.lock().unwrap().insert(oid.into(), value);
    }

    /// Sets a table cell: column OID plus instance suffix.
    pub fn set_cell(&self, column: &[u32], instance: &[u32], value: SnmpValue) {
        self.set(Oid::from(column).with_suffix(instance), value);
    }

    pub fn remove(&self, oid: &Oid) {
        self.values.lock().unwrap().remove(oid);
    }

    /// Makes every request against this agent time out.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    fn check_reachable(&self) -> SnmpResult<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            Err(SnmpError::Timeout)
        } else {
            Ok(())
        }
    }
}

struct SimSession {
    agent: Arc<SimAgent>,
}

#[async_trait]
impl SnmpSession for SimSession {
    async fn get(&self, oid: &Oid) -> SnmpResult<SnmpValue> {
        self.agent.check_reachable()?;
        self.agent
            .values
            .lock()
            .unwrap()
            .get(oid)
            .cloned()
            .ok_or_else(|| SnmpError::NoSuchObject(oid.clone()))
    }

    async fn get_next(&self, oid: &Oid) -> SnmpResult<VarBind> {
        self.agent.check_reachable()?;
        let values = self.agent.values.lock().unwrap();
        values
            .range((Bound::Excluded(oid.clone()), Bound::Unbounded))
            .next()
            .map(|(oid, value)| VarBind::new(oid.clone(), value.clone()))
            .ok_or_else(|| SnmpError::NoSuchObject(oid.clone()))
    }

    async fn sparse_walk(&self, columns: &[Oid]) -> SnmpResult<SparseWalk> {
        self.agent.check_reachable()?;
        let values = self.agent.values.lock().unwrap();
        let mut rows: SparseWalk = BTreeMap::new();
        for (slot, column) in columns.iter().enumerate() {
            for (oid, value) in values.iter() {
                if let Some(suffix) = oid.suffix_of(column) {
                    let row = rows
                        .entry(Oid::new(suffix.to_vec()))
                        .or_insert_with(|| vec![None; columns.len()]);
                    row[slot] = Some(value.clone());
                }
            }
        }
        Ok(rows)
    }
}

/// The in-memory backend: a named collection of [`SimAgent`]s plus a trap
/// injection channel.
#[derive(Debug)]
pub struct SimBackend {
    agents: Mutex<HashMap<String, Arc<SimAgent>>>,
    trap_tx: Mutex<Option<mpsc::Sender<TrapMessage>>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            trap_tx: Mutex::new(None),
        }
    }

    /// Returns the simulated agent for a device, creating it on first use.
    pub fn agent(&self, device_name: &str) -> Arc<SimAgent> {
        self.agents
            .lock()
            .unwrap()
            .entry(device_name.to_string())
            .or_insert_with(|| Arc::new(SimAgent::default()))
            .clone()
    }

    /// Feeds a trap into the receiver channel as if it arrived off the wire.
    pub async fn inject_trap(&self, trap: TrapMessage) -> bool {
        let tx = self.trap_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(trap).await.is_ok(),
            None => false,
        }
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnmpBackend for SimBackend {
    fn session(&self, device: &PollDevice) -> Arc<dyn SnmpSession> {
        Arc::new(SimSession {
            agent: self.agent(&device.name),
        })
    }

    async fn open_trap_receiver(&self, port: u16) -> SnmpResult<mpsc::Receiver<TrapMessage>> {
        debug!(port, "opening simulated trap receiver");
        let (tx, rx) = mpsc::channel(256);
        *self.trap_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn serve_agent(
        &self,
        config: &AgentConfiguration,
        _agent: Arc<UptimeAgent>,
    ) -> SnmpResult<()> {
        debug!(port = config.port, "simulated agent serving is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::mib;

    fn device() -> PollDevice {
        use zino_core::config::polldevs::parse_polldevs;
        let devices =
            parse_polldevs("name: example-gw\naddress: 10.0.42.1\n", "test.cf").unwrap();
        devices["example-gw"].clone()
    }

    #[tokio::test]
    async fn test_get_and_get_next() {
        let backend = SimBackend::new();
        let agent = backend.agent("example-gw");
        agent.set(mib::SYS_UPTIME, SnmpValue::TimeTicks(360000));

        let session = backend.session(&device());
        let value = session.get(&Oid::from(mib::SYS_UPTIME)).await.unwrap();
        assert_eq!(value, SnmpValue::TimeTicks(360000));

        let next = session
            .get_next(&Oid::from(mib::SYS_OBJECT_ID))
            .await
            .unwrap();
        assert_eq!(next.oid, Oid::from(mib::SYS_UPTIME));
    }

    #[tokio::test]
    async fn test_unreachable_agent_times_out() {
        let backend = SimBackend::new();
        let agent = backend.agent("example-gw");
        agent.set(mib::SYS_UPTIME, SnmpValue::TimeTicks(1));
        agent.set_unreachable(true);

        let session = backend.session(&device());
        assert_eq!(
            session.get(&Oid::from(mib::SYS_UPTIME)).await.unwrap_err(),
            SnmpError::Timeout
        );
    }

    #[tokio::test]
    async fn test_sparse_walk_collates_rows() {
        let backend = SimBackend::new();
        let agent = backend.agent("example-gw");
        agent.set_cell(mib::IF_DESCR, &[1], SnmpValue::OctetString(b"lo0".to_vec()));
        agent.set_cell(
            mib::IF_DESCR,
            &[150],
            SnmpValue::OctetString(b"ge-1/0/10".to_vec()),
        );
        agent.set_cell(mib::IF_OPER_STATUS, &[150], SnmpValue::Integer(2));

        let session = backend.session(&device());
        let columns = [Oid::from(mib::IF_DESCR), Oid::from(mib::IF_OPER_STATUS)];
        let rows = session.sparse_walk(&columns).await.unwrap();
        assert_eq!(rows.len(), 2);

        let row = &rows[&Oid::new(vec![150])];
        assert_eq!(
            row[0],
            Some(SnmpValue::OctetString(b"ge-1/0/10".to_vec()))
        );
        assert_eq!(row[1], Some(SnmpValue::Integer(2)));
        // lo0 has no oper status cell; the slot stays empty.
        assert_eq!(rows[&Oid::new(vec![1])][1], None);
    }

    #[tokio::test]
    async fn test_trap_injection_roundtrip() {
        let backend = SimBackend::new();
        let mut rx = backend.open_trap_receiver(162).await.unwrap();
        let trap = TrapMessage {
            source: "10.0.42.1".parse().unwrap(),
            source_port: 162,
            community: "public".to_string(),
            trap_oid: Oid::from(mib::TRAP_LINK_DOWN),
            varbinds: Vec::new(),
        };
        assert!(backend.inject_trap(trap).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.trap_oid, Oid::from(mib::TRAP_LINK_DOWN));
    }
}
