//! The uptime agent.
//!
//! Zino answers GETs for sysUpTime and sysDescr so legacy clients can tell
//! which of a master/standby pair they are talking to, and how long it has
//! been up. The value logic lives here; the wire transport is the
//! backend's.

use std::time::Instant;

use super::{mib, Oid, SnmpValue};

/// Scalar registry backing the agent.
pub struct UptimeAgent {
    started: Instant,
    descr: String,
}

impl UptimeAgent {
    pub fn new(descr: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            descr: descr.into(),
        }
    }

    /// Answers a GET, or None for objects the agent does not serve.
    pub fn handle_get(&self, oid: &Oid) -> Option<SnmpValue> {
        if oid == &Oid::from(mib::SYS_UPTIME) {
            let ticks = self.started.elapsed().as_millis() / 10;
            Some(SnmpValue::TimeTicks(ticks as u32))
        } else if oid == &Oid::from(mib::SYS_DESCR) {
            Some(SnmpValue::OctetString(self.descr.clone().into_bytes()))
        } else {
            None
        }
    }
}
