//! Per-device polling tasks.
//!
//! Five task kinds run against every device at its configured interval:
//! reachability, link state, BGP peering, BFD sessions and Juniper chassis
//! alarms. The reachability task gates the rest: while a device is marked
//! unreachable, the other kinds skip their runs. All tasks follow the same
//! shape: gather over SNMP first, then take the state lock and mutate.

mod alarm;
mod bfd;
mod bgp;
mod linkstate;
mod reachable;

use std::fmt;

pub use alarm::JuniperAlarmTask;
pub use bfd::BfdTask;
pub use bgp::BgpStateMonitorTask;
pub use linkstate::LinkStateTask;
pub(crate) use linkstate::schedule_port_verification;
pub use linkstate::VERIFY_DELAY;
pub use reachable::ReachableTask;

use tracing::debug;

use zino_core::config::polldevs::PollDevice;

use crate::engine::Engine;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// The kinds of periodic polling jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Reachability,
    LinkState,
    Bgp,
    Bfd,
    Alarm,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        Self::Reachability,
        Self::LinkState,
        Self::Bgp,
        Self::Bfd,
        Self::Alarm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachability => "reachability",
            Self::LinkState => "linkstate",
            Self::Bgp => "bgp",
            Self::Bfd => "bfd",
            Self::Alarm => "alarm",
        }
    }

    /// The task kinds applicable to a device's configuration. BFD and alarm
    /// jobs self-gate further on the detected vendor.
    pub fn for_device(device: &PollDevice) -> Vec<TaskKind> {
        let mut kinds = vec![Self::Reachability, Self::LinkState];
        if device.do_bgp {
            kinds.push(Self::Bgp);
        }
        kinds.push(Self::Bfd);
        kinds.push(Self::Alarm);
        kinds
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one task kind for one device, serialized on the device's session.
pub async fn run_task(
    engine: &Engine,
    scheduler: &Scheduler,
    device: &PollDevice,
    kind: TaskKind,
) -> Result<()> {
    if kind != TaskKind::Reachability {
        let reachable = engine
            .state()
            .devices
            .get(&device.name)
            .map(|d| d.reachable_in_last_run)
            .unwrap_or(true);
        if !reachable {
            debug!(device = %device.name, task = %kind, "device unreachable, skipping run");
            return Ok(());
        }
    }

    let slot = engine.session_slot(device);
    let session = slot.lock().await;
    match kind {
        TaskKind::Reachability => {
            ReachableTask::new(engine, scheduler, device)
                .run(session.as_ref())
                .await
        }
        TaskKind::LinkState => {
            LinkStateTask::new(engine, scheduler, device)
                .run(session.as_ref())
                .await
        }
        TaskKind::Bgp => {
            BgpStateMonitorTask::new(engine, device)
                .run(session.as_ref())
                .await
        }
        TaskKind::Bfd => BfdTask::new(engine, device).run(session.as_ref()).await,
        TaskKind::Alarm => {
            JuniperAlarmTask::new(engine, device)
                .run(session.as_ref())
                .await
        }
    }
}

/// Runs all applicable task kinds for a device, reachability first. If the
/// device turns out unreachable, the rest of the cycle is skipped.
pub async fn run_all_tasks(engine: &Engine, scheduler: &Scheduler, device: &PollDevice) {
    for kind in TaskKind::for_device(device) {
        if let Err(err) = run_task(engine, scheduler, device, kind).await {
            debug!(device = %device.name, task = %kind, %err, "task run failed");
        }
        if kind == TaskKind::Reachability {
            let reachable = engine
                .state()
                .devices
                .get(&device.name)
                .map(|d| d.reachable_in_last_run)
                .unwrap_or(false);
            if !reachable {
                debug!(device = %device.name, "unreachable, skipping rest of cycle");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zino_core::config::polldevs::parse_polldevs;

    #[test]
    fn test_task_kinds_respect_do_bgp() {
        let devices = parse_polldevs(
            "name: a-gw\naddress: 10.0.0.1\ndo_bgp: no\n",
            "test.cf",
        )
        .unwrap();
        let kinds = TaskKind::for_device(&devices["a-gw"]);
        assert!(!kinds.contains(&TaskKind::Bgp));
        assert!(kinds.contains(&TaskKind::Reachability));
        assert_eq!(kinds[0], TaskKind::Reachability);
    }
}
