//! Reachability polling.
//!
//! Issues a small GET for sysUpTime each cycle. Consecutive failures past
//! the threshold raise a reachability event and start a faster recheck loop
//! that runs until the device answers again. A successful probe also
//! refreshes the boot time and, once, the vendor enterprise id from
//! sysObjectID.

use std::time::Duration;

use tracing::{debug, info};

use zino_core::config::polldevs::PollDevice;
use zino_core::events::{EventData, EventKey, EventKind, ReachabilityData, ReachabilityStatus, SubIndex};

use crate::engine::Engine;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::snmp::{mib, Oid, SnmpSession, SnmpValue};

/// Consecutive probe failures before a reachability event is raised.
pub const FAILURE_THRESHOLD: u32 = 2;

/// Interval of the extra recheck loop while a device is down.
pub const EXTRA_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct ReachableTask<'a> {
    engine: &'a Engine,
    scheduler: &'a Scheduler,
    device: &'a PollDevice,
}

impl<'a> ReachableTask<'a> {
    pub fn new(engine: &'a Engine, scheduler: &'a Scheduler, device: &'a PollDevice) -> Self {
        Self {
            engine,
            scheduler,
            device,
        }
    }

    pub async fn run(&self, session: &dyn SnmpSession) -> Result<()> {
        match session.get(&Oid::from(mib::SYS_UPTIME)).await {
            Ok(uptime) => {
                let needs_vendor_probe = self
                    .engine
                    .state()
                    .devices
                    .get(&self.device.name)
                    .map(|d| d.enterprise_id.is_none())
                    .unwrap_or(true);
                let sys_object_id = if needs_vendor_probe {
                    session.get(&Oid::from(mib::SYS_OBJECT_ID)).await.ok()
                } else {
                    None
                };
                mark_device_reachable(
                    self.engine,
                    self.device,
                    uptime.as_u64().unwrap_or(0),
                    sys_object_id,
                )
            }
            Err(err) => {
                debug!(device = %self.device.name, %err, "reachability probe failed");
                self.mark_unreachable()
            }
        }
    }

    fn mark_unreachable(&self) -> Result<()> {
        let raise_event = {
            let mut state = self.engine.state();
            let dev = state.devices.get_or_create(&self.device.name);
            dev.reachable_in_last_run = false;
            dev.reachability_failures += 1;
            let failures = dev.reachability_failures;

            if failures >= FAILURE_THRESHOLD {
                let (mut event, created) = state
                    .events
                    .get_or_create(&self.device.name, EventData::Reachability(ReachabilityData::default()));
                event.polladdr = Some(self.device.address);
                event.priority = self.device.priority;
                let already_down = matches!(
                    &event.data,
                    EventData::Reachability(d) if d.reachability == Some(ReachabilityStatus::NoResponse)
                );
                if created || !already_down {
                    if let EventData::Reachability(data) = &mut event.data {
                        data.reachability = Some(ReachabilityStatus::NoResponse);
                    }
                    event.add_log(format!("{} no-response", self.device.name));
                    info!(device = %self.device.name, "device is not reachable");
                }
                state.commit_event(event)?;
                true
            } else {
                false
            }
        };

        if raise_event {
            self.engine.dump_soon.notify_one();
            let name = format!("{}-reachable-extra", self.device.name);
            let engine = self.engine.clone();
            let device = self.device.clone();
            self.scheduler
                .enqueue_named(name, EXTRA_CHECK_INTERVAL, recheck_loop(engine, device));
        }
        Ok(())
    }
}

/// Records a successful probe: clears failure tracking, refreshes boot
/// time, picks up the enterprise id, and marks any open reachability event
/// as reachable (without closing it; closure is the operator's call).
pub(crate) fn mark_device_reachable(
    engine: &Engine,
    device: &PollDevice,
    uptime_ticks: u64,
    sys_object_id: Option<SnmpValue>,
) -> Result<()> {
    let mut state = engine.state();
    state.note_device_address(&device.name, device.address);
    let dev = state.devices.get_or_create(&device.name);
    let was_down = !dev.reachable_in_last_run;
    dev.reachable_in_last_run = true;
    dev.reachability_failures = 0;
    dev.set_boot_time_from_uptime(uptime_ticks);
    if let Some(value) = sys_object_id {
        if let Some(oid) = value.as_oid() {
            if let Some(suffix) = oid.suffix_of(&Oid::from(mib::ENTERPRISES)) {
                dev.enterprise_id = suffix.first().copied();
                debug!(device = %device.name, enterprise = ?dev.enterprise_id, "detected vendor");
            }
        }
    }
    if was_down {
        info!(device = %device.name, "device is reachable again");
    }

    let key = EventKey {
        router: device.name.clone(),
        subindex: SubIndex::None,
        kind: EventKind::Reachability,
    };
    let stale = state.events.lookup(&key).and_then(|event| {
        let current = match &event.data {
            EventData::Reachability(d) => d.reachability,
            _ => None,
        };
        (current != Some(ReachabilityStatus::Reachable)).then_some(event.id)
    });
    if let Some(id) = stale {
        let mut event = state.events.checkout(id)?;
        if let EventData::Reachability(data) = &mut event.data {
            data.reachability = Some(ReachabilityStatus::Reachable);
        }
        event.add_log(format!("{} reachable", device.name));
        state.commit_event(event)?;
    }
    Ok(())
}

/// The extra recheck loop: probes every minute until the device answers.
pub(crate) async fn recheck_loop(engine: Engine, device: PollDevice) {
    loop {
        let slot = engine.session_slot(&device);
        let probe = {
            let session = slot.lock().await;
            session.get(&Oid::from(mib::SYS_UPTIME)).await
        };
        match probe {
            Ok(uptime) => {
                if let Err(err) =
                    mark_device_reachable(&engine, &device, uptime.as_u64().unwrap_or(0), None)
                {
                    debug!(device = %device.name, %err, "recheck bookkeeping failed");
                }
                return;
            }
            Err(_) => tokio::time::sleep(EXTRA_CHECK_INTERVAL).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{device, sim_engine};
    use crate::scheduler::Scheduler;
    use crate::snmp::SnmpValue;
    use zino_core::events::EventState;

    const POLLFILE: &str = "name: example-gw\naddress: 10.0.42.1\n";

    #[tokio::test]
    async fn test_single_failure_does_not_raise_event() {
        let (engine, backend) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let dev = device(&engine, "example-gw");
        backend.agent("example-gw").set_unreachable(true);

        let slot = engine.session_slot(&dev);
        let session = slot.lock().await;
        ReachableTask::new(&engine, &scheduler, &dev)
            .run(session.as_ref())
            .await
            .unwrap();

        let state = engine.state();
        assert_eq!(state.events.iter_open().count(), 0);
        assert!(!state.devices.get("example-gw").unwrap().reachable_in_last_run);
    }

    #[tokio::test]
    async fn test_threshold_failures_raise_reachability_event() {
        let (engine, backend) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let dev = device(&engine, "example-gw");
        backend.agent("example-gw").set_unreachable(true);

        for _ in 0..FAILURE_THRESHOLD {
            let slot = engine.session_slot(&dev);
            let session = slot.lock().await;
            ReachableTask::new(&engine, &scheduler, &dev)
                .run(session.as_ref())
                .await
                .unwrap();
        }

        let state = engine.state();
        let event = state.events.iter_open().next().expect("event raised");
        assert_eq!(event.state, EventState::Open);
        assert!(matches!(
            &event.data,
            EventData::Reachability(d) if d.reachability == Some(ReachabilityStatus::NoResponse)
        ));
        assert!(event.log.iter().any(|l| l.message == "example-gw no-response"));
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_recovery_marks_event_reachable_but_open() {
        let (engine, backend) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let dev = device(&engine, "example-gw");
        let agent = backend.agent("example-gw");
        agent.set(mib::SYS_UPTIME, SnmpValue::TimeTicks(360000));
        agent.set_unreachable(true);

        for _ in 0..FAILURE_THRESHOLD {
            let slot = engine.session_slot(&dev);
            let session = slot.lock().await;
            ReachableTask::new(&engine, &scheduler, &dev)
                .run(session.as_ref())
                .await
                .unwrap();
        }

        agent.set_unreachable(false);
        {
            let slot = engine.session_slot(&dev);
            let session = slot.lock().await;
            ReachableTask::new(&engine, &scheduler, &dev)
                .run(session.as_ref())
                .await
                .unwrap();
        }

        let state = engine.state();
        let event = state.events.iter_open().next().expect("event still open");
        assert_eq!(event.state, EventState::Open);
        assert!(matches!(
            &event.data,
            EventData::Reachability(d) if d.reachability == Some(ReachabilityStatus::Reachable)
        ));
        assert!(event.log.iter().any(|l| l.message == "example-gw reachable"));
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_vendor_probe_records_enterprise_id() {
        let (engine, backend) = sim_engine(POLLFILE);
        let scheduler = Scheduler::new(engine.clone());
        let dev = device(&engine, "example-gw");
        let agent = backend.agent("example-gw");
        agent.set(mib::SYS_UPTIME, SnmpValue::TimeTicks(100));
        agent.set(
            mib::SYS_OBJECT_ID,
            SnmpValue::Oid(Oid::new(vec![1, 3, 6, 1, 4, 1, 2636, 1, 1, 1, 2, 21])),
        );

        let slot = engine.session_slot(&dev);
        let session = slot.lock().await;
        ReachableTask::new(&engine, &scheduler, &dev)
            .run(session.as_ref())
            .await
            .unwrap();

        let state = engine.state();
        assert!(state.devices.get("example-gw").unwrap().is_juniper());
        scheduler.cancel_all();
    }
}
