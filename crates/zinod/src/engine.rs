//! The daemon's shared context.
//!
//! One [`Engine`] is built at startup and cloned into every task, trap
//! observer and protocol session. It owns the state lock, the current
//! device registry snapshot, per-device SNMP session locks, and the
//! transport seams. The lock is synchronous and must never be held across
//! an await; the pattern throughout the daemon is gather-then-mutate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use zino_core::config::polldevs::PollDevice;
use zino_core::config::Configuration;
use zino_core::ZinoState;

use crate::dns::ReverseResolver;
use crate::registry::DeviceRegistry;
use crate::snmp::{SnmpBackend, SnmpSession};

/// Per-device session slot: the async mutex serializes SNMP use across task
/// kinds, the session itself is reused.
pub type SessionSlot = Arc<tokio::sync::Mutex<Arc<dyn SnmpSession>>>;

/// Shared daemon context.
#[derive(Clone)]
pub struct Engine {
    state: Arc<Mutex<ZinoState>>,
    registry: Arc<Mutex<Arc<DeviceRegistry>>>,
    pub config: Arc<Configuration>,
    pub snmp: Arc<dyn SnmpBackend>,
    pub resolver: Arc<dyn ReverseResolver>,
    sessions: Arc<Mutex<HashMap<String, SessionSlot>>>,
    /// Signalled whenever a commit should pull the next state dump forward.
    pub dump_soon: Arc<Notify>,
}

impl Engine {
    pub fn new(
        state: ZinoState,
        registry: DeviceRegistry,
        config: Configuration,
        snmp: Arc<dyn SnmpBackend>,
        resolver: Arc<dyn ReverseResolver>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            registry: Arc::new(Mutex::new(Arc::new(registry))),
            config: Arc::new(config),
            snmp,
            resolver,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            dump_soon: Arc::new(Notify::new()),
        }
    }

    /// Locks the state. Never hold the guard across an await.
    pub fn state(&self) -> MutexGuard<'_, ZinoState> {
        self.state.lock().unwrap()
    }

    /// The current registry snapshot.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.lock().unwrap().clone()
    }

    /// Atomically replaces the registry snapshot.
    pub fn swap_registry(&self, new: DeviceRegistry) -> Arc<DeviceRegistry> {
        let mut slot = self.registry.lock().unwrap();
        let old = slot.clone();
        *slot = Arc::new(new);
        old
    }

    /// Looks up a device's polling parameters by name.
    pub fn device(&self, name: &str) -> Option<PollDevice> {
        self.registry().get(name).cloned()
    }

    /// Returns the session slot for a device, creating the session lazily.
    pub fn session_slot(&self, device: &PollDevice) -> SessionSlot {
        self.sessions
            .lock()
            .unwrap()
            .entry(device.name.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(self.snmp.session(device))))
            .clone()
    }

    /// Drops the cached session for a device (removed or re-parameterized).
    pub fn drop_session(&self, device_name: &str) {
        self.sessions.lock().unwrap().remove(device_name);
    }

    /// Commits an event through the planned-maintenance-aware path and
    /// nudges the persister.
    pub fn commit_event(&self, event: zino_core::events::Event) -> zino_core::Result<()> {
        let result = self.state().commit_event(event);
        self.dump_soon.notify_one();
        result
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use zino_core::config::polldevs::{parse_polldevs, PollDevice};
    use zino_core::config::Configuration;
    use zino_core::ZinoState;

    use super::Engine;
    use crate::dns::NullResolver;
    use crate::registry::DeviceRegistry;
    use crate::snmp::sim::SimBackend;

    /// Builds an engine over the sim backend with the given pollfile text.
    pub fn sim_engine(pollfile: &str) -> (Engine, Arc<SimBackend>) {
        let backend = Arc::new(SimBackend::new());
        let devices = parse_polldevs(pollfile, "test.cf").unwrap();
        let registry = DeviceRegistry {
            devices,
            mtime: None,
        };
        let engine = Engine::new(
            ZinoState::new(),
            registry,
            Configuration::default(),
            backend.clone(),
            Arc::new(NullResolver),
        );
        (engine, backend)
    }

    pub fn device(engine: &Engine, name: &str) -> PollDevice {
        engine.device(name).expect("test device must exist")
    }
}
