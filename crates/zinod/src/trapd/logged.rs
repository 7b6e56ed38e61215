//! Traps that are only worth a log line.
//!
//! Configuration changes, reloads and OSPF config errors do not map to any
//! event type, but operators still want them in the daemon log.

use async_trait::async_trait;
use tracing::info;

use super::{TrapMessage, TrapObserver};
use crate::snmp::{mib, Oid};

pub struct LoggedTrapObserver;

impl LoggedTrapObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggedTrapObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrapObserver for LoggedTrapObserver {
    fn wanted_traps(&self) -> Vec<Oid> {
        vec![
            Oid::from(mib::TRAP_CISCO_CONFIG_MAN_EVENT),
            Oid::from(mib::TRAP_CISCO_RELOAD),
            Oid::from(mib::TRAP_OSPF_IF_CONFIG_ERROR),
            Oid::from(mib::TRAP_COLD_START),
        ]
    }

    async fn handle_trap(&self, trap: &TrapMessage, device_name: &str) -> bool {
        let what = if trap.trap_oid == Oid::from(mib::TRAP_CISCO_CONFIG_MAN_EVENT) {
            "configuration change"
        } else if trap.trap_oid == Oid::from(mib::TRAP_CISCO_RELOAD) {
            "reload"
        } else if trap.trap_oid == Oid::from(mib::TRAP_OSPF_IF_CONFIG_ERROR) {
            "OSPF interface config error"
        } else {
            "cold start"
        };
        info!(device = %device_name, trap = %trap.trap_oid, "{what} reported via trap");
        false
    }
}
