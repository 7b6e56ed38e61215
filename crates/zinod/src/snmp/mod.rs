//! SNMP transport seam.
//!
//! The wire codec is an external collaborator: everything the daemon needs
//! from it is expressed by the [`SnmpBackend`] and [`SnmpSession`] traits
//! (GET / GET-NEXT / bulk column walks, trap reception and agent serving).
//! Tasks and trap observers are written against these traits only, which is
//! what makes the whole polling engine testable without a network.
//!
//! The crate ships one backend: [`sim`], an in-memory agent table used by
//! the test-suite and for protocol experiments. Production transports
//! register here under their own names.

pub mod agent;
pub mod mib;
pub mod sim;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use zino_core::config::polldevs::PollDevice;
use zino_core::config::AgentConfiguration;

use crate::trapd::TrapMessage;
pub use types::{Oid, SnmpValue, VarBind};

/// SNMP transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnmpError {
    /// The agent did not answer within the configured timeout/retries.
    #[error("SNMP timeout")]
    Timeout,
    /// The requested object does not exist on the agent.
    #[error("no such object: {0}")]
    NoSuchObject(Oid),
    /// No backend registered under this name.
    #[error("unknown SNMP backend: {0}")]
    UnknownBackend(String),
    /// Anything else the transport reports.
    #[error("SNMP backend error: {0}")]
    Backend(String),
}

/// Result type for SNMP operations.
pub type SnmpResult<T> = std::result::Result<T, SnmpError>;

/// A sparse column walk: instance suffix to one value slot per requested
/// column, in request order.
pub type SparseWalk = BTreeMap<Oid, Vec<Option<SnmpValue>>>;

/// One reusable SNMP session against a single device.
///
/// A session is exclusively owned by its device's task queue: reusable
/// across task kinds, never used concurrently.
#[async_trait]
pub trait SnmpSession: Send + Sync {
    /// GET of a single object.
    async fn get(&self, oid: &Oid) -> SnmpResult<SnmpValue>;

    /// GET-NEXT: the first varbind lexically after `oid`.
    async fn get_next(&self, oid: &Oid) -> SnmpResult<VarBind>;

    /// Bulk-walks several table columns, collating rows by instance.
    async fn sparse_walk(&self, columns: &[Oid]) -> SnmpResult<SparseWalk>;
}

/// Factory for sessions plus the trap and agent transports.
#[async_trait]
pub trait SnmpBackend: Send + Sync + std::fmt::Debug {
    /// Opens (or reuses) a session for the given device parameters.
    fn session(&self, device: &PollDevice) -> Arc<dyn SnmpSession>;

    /// Starts trap reception on the given UDP port; parsed messages arrive
    /// on the returned channel.
    async fn open_trap_receiver(&self, port: u16) -> SnmpResult<mpsc::Receiver<TrapMessage>>;

    /// Serves the uptime agent through this backend's transport.
    async fn serve_agent(
        &self,
        config: &AgentConfiguration,
        agent: Arc<agent::UptimeAgent>,
    ) -> SnmpResult<()>;
}

/// Instantiates a backend by its configured name.
pub fn backend_by_name(name: &str) -> SnmpResult<Arc<dyn SnmpBackend>> {
    match name {
        "sim" => Ok(Arc::new(sim::SimBackend::new())),
        other => Err(SnmpError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_registry() {
        assert!(backend_by_name("sim").is_ok());
        assert_eq!(
            backend_by_name("netsnmp").unwrap_err(),
            SnmpError::UnknownBackend("netsnmp".to_string())
        );
    }
}
