//! Trap reception and dispatch.
//!
//! The transport backend parses inbound SNMP notifications into
//! [`TrapMessage`]s; this module matches them to devices by source address,
//! applies the community filter, and hands them to type-specific observers.
//! Observers follow trap-directed polling: they update caches and schedule
//! a confirming poll rather than trusting trap contents outright.

mod bfd;
mod bgp;
mod link;
mod logged;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use bfd::BfdTrapObserver;
pub use bgp::BgpTrapObserver;
pub use link::LinkTrapObserver;
pub use logged::LoggedTrapObserver;

use crate::engine::Engine;
use crate::scheduler::Scheduler;
use crate::snmp::{Oid, SnmpValue};

/// One varbind from a trap PDU.
#[derive(Debug, Clone)]
pub struct TrapVarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

/// A parsed inbound notification.
#[derive(Debug, Clone)]
pub struct TrapMessage {
    pub source: IpAddr,
    pub source_port: u16,
    pub community: String,
    pub trap_oid: Oid,
    pub varbinds: Vec<TrapVarBind>,
}

impl TrapMessage {
    /// Finds the first varbind under the given column OID.
    pub fn get_column(&self, column: &[u32]) -> Option<&TrapVarBind> {
        let column = Oid::from(column);
        self.varbinds.iter().find(|vb| vb.oid.starts_with(&column))
    }
}

/// A type-specific trap handler.
///
/// Returning `true` offers the trap to further observers; `false` stops
/// dispatch.
#[async_trait]
pub trait TrapObserver: Send + Sync {
    /// The trap OIDs this observer wants.
    fn wanted_traps(&self) -> Vec<Oid>;

    async fn handle_trap(&self, trap: &TrapMessage, device_name: &str) -> bool;
}

/// Routes inbound traps to their observers.
pub struct TrapDispatcher {
    engine: Engine,
    observers: Vec<Arc<dyn TrapObserver>>,
    require_community: Vec<String>,
}

impl TrapDispatcher {
    /// Builds a dispatcher with the standard observer set.
    pub fn new(engine: Engine, scheduler: Scheduler) -> Self {
        let require_community = engine.config.snmp.trap.require_community.clone();
        let observers: Vec<Arc<dyn TrapObserver>> = vec![
            Arc::new(LinkTrapObserver::new(engine.clone(), scheduler.clone())),
            Arc::new(BgpTrapObserver::new(engine.clone(), scheduler.clone())),
            Arc::new(BfdTrapObserver::new(engine.clone(), scheduler)),
            Arc::new(LoggedTrapObserver::new()),
        ];
        Self {
            engine,
            observers,
            require_community,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_observers(
        engine: Engine,
        observers: Vec<Arc<dyn TrapObserver>>,
        require_community: Vec<String>,
    ) -> Self {
        Self {
            engine,
            observers,
            require_community,
        }
    }

    /// Consumes the backend's trap channel until shutdown.
    pub async fn run(self, mut rx: mpsc::Receiver<TrapMessage>, token: CancellationToken) {
        info!("trap dispatch running");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = rx.recv() => match message {
                    Some(trap) => self.dispatch(&trap).await,
                    None => break,
                },
            }
        }
        info!("trap dispatch stopped");
    }

    /// Dispatches one trap message.
    pub async fn dispatch(&self, trap: &TrapMessage) {
        if !self.require_community.is_empty()
            && !self.require_community.contains(&trap.community)
        {
            debug!(
                source = %trap.source,
                community = %trap.community,
                "trap community not accepted, dropping"
            );
            return;
        }

        let device_name = self
            .engine
            .state()
            .device_for_address(trap.source)
            .map(str::to_string)
            .or_else(|| {
                // Fall back to the registry's configured addresses before
                // the first poll has recorded anything.
                self.engine
                    .registry()
                    .devices
                    .values()
                    .find(|d| d.address == trap.source)
                    .map(|d| d.name.clone())
            });
        let Some(device_name) = device_name else {
            debug!(source = %trap.source, trap = %trap.trap_oid, "trap from unknown source, dropping");
            return;
        };

        for observer in &self.observers {
            let wanted = observer
                .wanted_traps()
                .iter()
                .any(|oid| &trap.trap_oid == oid);
            if !wanted {
                continue;
            }
            if !observer.handle_trap(trap, &device_name).await {
                return;
            }
        }
        debug!(device = %device_name, trap = %trap.trap_oid, "trap dispatched");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::testutil::sim_engine;
    use crate::snmp::mib;

    struct CountingObserver {
        wanted: Vec<Oid>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrapObserver for CountingObserver {
        fn wanted_traps(&self) -> Vec<Oid> {
            self.wanted.clone()
        }

        async fn handle_trap(&self, _trap: &TrapMessage, _device: &str) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    fn trap(source: &str, community: &str, oid: &[u32]) -> TrapMessage {
        TrapMessage {
            source: source.parse().unwrap(),
            source_port: 162,
            community: community.to_string(),
            trap_oid: Oid::from(oid),
            varbinds: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_source_is_dropped() {
        let (engine, _) = sim_engine("name: a-gw\naddress: 10.0.0.1\n");
        let observer = Arc::new(CountingObserver {
            wanted: vec![Oid::from(mib::TRAP_LINK_DOWN)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher = TrapDispatcher::with_observers(
            engine,
            vec![observer.clone()],
            vec!["public".to_string()],
        );
        dispatcher
            .dispatch(&trap("192.0.2.99", "public", mib::TRAP_LINK_DOWN))
            .await;
        assert_eq!(observer.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_community_filter_rejects() {
        let (engine, _) = sim_engine("name: a-gw\naddress: 10.0.0.1\n");
        let observer = Arc::new(CountingObserver {
            wanted: vec![Oid::from(mib::TRAP_LINK_DOWN)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher = TrapDispatcher::with_observers(
            engine,
            vec![observer.clone()],
            vec!["public".to_string()],
        );
        dispatcher
            .dispatch(&trap("10.0.0.1", "wrong", mib::TRAP_LINK_DOWN))
            .await;
        assert_eq!(observer.calls.load(Ordering::Relaxed), 0);

        dispatcher
            .dispatch(&trap("10.0.0.1", "public", mib::TRAP_LINK_DOWN))
            .await;
        assert_eq!(observer.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unwanted_traps_are_ignored() {
        let (engine, _) = sim_engine("name: a-gw\naddress: 10.0.0.1\n");
        let observer = Arc::new(CountingObserver {
            wanted: vec![Oid::from(mib::TRAP_LINK_DOWN)],
            calls: AtomicUsize::new(0),
        });
        let dispatcher =
            TrapDispatcher::with_observers(engine, vec![observer.clone()], Vec::new());
        dispatcher
            .dispatch(&trap("10.0.0.1", "anything", mib::TRAP_COLD_START))
            .await;
        assert_eq!(observer.calls.load(Ordering::Relaxed), 0);
    }
}
