//! The cooperative job scheduler.
//!
//! One periodic job exists per (device, task-kind). Initial fire times are
//! staggered by hashing the job identity over the device's interval so the
//! fleet does not poll in lockstep; the reachability job always gets the
//! earliest slot so it can gate the rest of the cycle. A delayed run still
//! fires once, but misfires beyond the configured grace collapse. One-shot
//! jobs (API-triggered polls, trap confirmations, reachability rechecks)
//! are deduplicated by name.
//!
//! The scheduler also owns the daemon's system jobs: pollfile reload,
//! planned-maintenance transitions, flap ageing, closed-event archival and
//! the periodic state dump.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use zino_core::config::polldevs::PollDevice;
use zino_core::events::{
    AlarmColor, AlarmData, EventData, EventKey, EventKind, EventState, FlapState, PortStateData,
    SubIndex,
};
use zino_core::persist::{self, Snapshot, CLOSED_EVENT_RETENTION_HOURS};
use zino_core::pm::PmType;
use zino_core::ZinoState;

use crate::engine::Engine;
use crate::registry::DeviceRegistry;
use crate::tasks::{self, TaskKind};

/// Cadence of the planned-maintenance transition job.
const PM_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the flap stabilization check.
const FLAP_AGE_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence of the closed-event archival sweep.
const ARCHIVE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A commit never pulls the next state dump closer than this.
const MIN_DUMP_INTERVAL: Duration = Duration::from_secs(10);

type JobId = (String, TaskKind);

struct JobHandle {
    cancel: CancellationToken,
    /// The device parameters the job was spawned with; a change reschedules.
    device: PollDevice,
}

/// Handle to the running scheduler. Clones share the same job table.
#[derive(Clone)]
pub struct Scheduler {
    engine: Engine,
    jobs: Arc<Mutex<HashMap<JobId, JobHandle>>>,
    one_shots: Arc<Mutex<HashSet<String>>>,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            one_shots: Arc::new(Mutex::new(HashSet::new())),
            root: CancellationToken::new(),
        }
    }

    /// The token every job descends from; cancelled on shutdown.
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancels all jobs, periodic and one-shot.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Starts the system jobs and schedules polling for the current
    /// registry.
    pub fn start(&self) {
        self.sync_with_registry();
        self.spawn_system_job("pollfile-reload", self.polling_period(), reload_pollfile);
        self.spawn_system_job("pm-tick", PM_TICK_INTERVAL, pm_tick);
        self.spawn_system_job("flap-age", FLAP_AGE_INTERVAL, age_flaps);
        self.spawn_system_job("archive-sweep", ARCHIVE_SWEEP_INTERVAL, archive_expired_events);

        let scheduler = self.clone();
        let token = self.root.child_token();
        tokio::spawn(async move { persistence_loop(scheduler.engine, token).await });
    }

    fn polling_period(&self) -> Duration {
        Duration::from_secs(self.engine.config.polling.period.max(1) * 60)
    }

    fn spawn_system_job(
        &self,
        name: &'static str,
        interval: Duration,
        job: fn(&Engine, &Scheduler),
    ) {
        let scheduler = self.clone();
        let token = self.root.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                job(&scheduler.engine, &scheduler);
            }
            debug!(job = name, "system job stopped");
        });
    }

    /// Reconciles the job table against the current device registry:
    /// new devices get jobs, removed devices lose theirs (and their open
    /// events), changed devices are rescheduled.
    pub fn sync_with_registry(&self) {
        let registry = self.engine.registry();

        let mut cancelled_ids = Vec::new();
        let mut removed_devices = HashSet::new();
        let mut changed_devices = HashSet::new();
        {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.retain(|(device_name, kind), handle| {
                match registry.get(device_name) {
                    Some(device) if device == &handle.device => true,
                    Some(_) => {
                        handle.cancel.cancel();
                        cancelled_ids.push((device_name.clone(), *kind));
                        changed_devices.insert(device_name.clone());
                        false
                    }
                    None => {
                        handle.cancel.cancel();
                        cancelled_ids.push((device_name.clone(), *kind));
                        removed_devices.insert(device_name.clone());
                        false
                    }
                }
            });
        }

        for name in &removed_devices {
            self.engine.drop_session(name);
            let mut state = self.engine.state();
            if let Err(err) = state.close_events_for_device(name, "monitor") {
                error!(device = %name, %err, "failed closing events for removed device");
            }
            if let Some(dev) = state.devices.remove(name) {
                for addr in dev.addresses {
                    state.addresses.remove(&addr);
                }
            }
        }
        for name in &changed_devices {
            self.engine.drop_session(name);
            debug!(device = %name, "device parameters changed, rescheduling");
        }

        for device in registry.devices.values() {
            for kind in TaskKind::for_device(device) {
                let id = (device.name.clone(), kind);
                let already_scheduled = self.jobs.lock().unwrap().contains_key(&id);
                if !already_scheduled {
                    self.spawn_job(device.clone(), kind);
                }
            }
        }

        if !cancelled_ids.is_empty() || !removed_devices.is_empty() {
            info!(
                cancelled = cancelled_ids.len(),
                removed = removed_devices.len(),
                "reconciled polling jobs with registry"
            );
        }
    }

    fn spawn_job(&self, device: PollDevice, kind: TaskKind) {
        let cancel = self.root.child_token();
        let interval = Duration::from_secs(device.interval.max(1) * 60);
        let offset = Duration::from_secs(stagger_offset(&device.name, kind, interval.as_secs()));
        let grace = Duration::from_secs(self.engine.config.scheduler.misfire_grace_time);
        let scheduler = self.clone();
        let job_device = device.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut next = Instant::now() + offset;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next) => {}
                }

                let run = tasks::run_task(&scheduler.engine, &scheduler, &job_device, kind);
                match tokio::time::timeout(interval, run).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(device = %job_device.name, task = %kind, %err, "task run failed");
                    }
                    Err(_) => {
                        warn!(
                            device = %job_device.name,
                            task = %kind,
                            "task run exceeded its interval and was aborted"
                        );
                    }
                }

                next += interval;
                let now = Instant::now();
                if next < now {
                    // One late run already happened above; collapse anything
                    // beyond the grace window.
                    if now.duration_since(next) > grace {
                        let mut skipped = 0u32;
                        while next < now {
                            next += interval;
                            skipped += 1;
                        }
                        warn!(
                            device = %job_device.name,
                            task = %kind,
                            skipped,
                            "collapsed misfired runs"
                        );
                    }
                }
            }
        });

        self.jobs
            .lock()
            .unwrap()
            .insert((device.name.clone(), kind), JobHandle { cancel, device });
    }

    /// Schedules a named one-shot. Returns false when a one-shot with the
    /// same name is already pending.
    pub fn enqueue_named(
        &self,
        name: String,
        delay: Duration,
        fut: impl Future<Output = ()> + Send + 'static,
    ) -> bool {
        if !self.one_shots.lock().unwrap().insert(name.clone()) {
            debug!(job = %name, "one-shot already pending");
            return false;
        }
        let scheduler = self.clone();
        let token = self.root.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => fut.await,
            }
            scheduler.one_shots.lock().unwrap().remove(&name);
        });
        true
    }

    /// API-triggered full poll of one device (POLLRTR).
    pub fn poll_router(&self, device: &PollDevice) {
        let name = format!("{}-api-triggered", device.name);
        let engine = self.engine.clone();
        let scheduler = self.clone();
        let device = device.clone();
        self.enqueue_named(name, Duration::ZERO, async move {
            tasks::run_all_tasks(&engine, &scheduler, &device).await;
        });
    }

    /// API-triggered single-interface poll (POLLINTF).
    pub fn poll_interface(&self, device: &PollDevice, ifindex: u32) {
        tasks::schedule_port_verification(
            &self.engine,
            self,
            device,
            ifindex,
            Duration::ZERO,
            "api-triggered",
        );
    }

    #[cfg(test)]
    pub(crate) fn pending_one_shots(&self) -> Vec<String> {
        self.one_shots.lock().unwrap().iter().cloned().collect()
    }
}

/// Deterministic stagger offset within the polling interval. The
/// reachability job takes the earliest of the device's slots so it runs
/// (and gates) first.
pub fn stagger_offset(device_name: &str, kind: TaskKind, interval_secs: u64) -> u64 {
    if interval_secs == 0 {
        return 0;
    }
    let raw = |kind: TaskKind| {
        let mut hasher = DefaultHasher::new();
        device_name.hash(&mut hasher);
        kind.as_str().hash(&mut hasher);
        hasher.finish() % interval_secs
    };
    match kind {
        TaskKind::Reachability => TaskKind::ALL.into_iter().map(raw).min().unwrap_or(0),
        other => raw(other),
    }
}

/// Checks the pollfile's modification time and reloads the registry when
/// it changed. A parse failure keeps the previous registry.
fn reload_pollfile(engine: &Engine, scheduler: &Scheduler) {
    let path = PathBuf::from(&engine.config.polling.file);
    if !engine.registry().is_stale(&path) {
        return;
    }
    match DeviceRegistry::load(&path) {
        Ok(new_registry) => {
            info!(file = %path.display(), devices = new_registry.len(), "pollfile reloaded");
            engine.swap_registry(new_registry);
            scheduler.sync_with_registry();
        }
        Err(err) => {
            warn!(file = %path.display(), %err, "pollfile reload failed, keeping previous registry");
        }
    }
}

/// Starts, ends and expires planned maintenances.
fn pm_tick(engine: &Engine, _scheduler: &Scheduler) {
    let now = Utc::now();
    let mut state = engine.state();

    for pm_id in state.planned_maintenances.started_since_last_run(now) {
        start_planned_maintenance(&mut state, pm_id);
    }

    for pm_id in state.planned_maintenances.ended_since_last_run(now) {
        end_planned_maintenance(&mut state, pm_id);
    }

    for pm_id in state.planned_maintenances.expired(now) {
        debug!(pm = pm_id, "planned maintenance expired");
        state.planned_maintenances.remove(pm_id);
    }

    state.planned_maintenances.last_run = Some(now);
}

/// Puts all events a starting PM matches into the ignored state, creating
/// the events its targets imply where none exist yet.
fn start_planned_maintenance(state: &mut ZinoState, pm_id: u32) {
    let Some(pm) = state.planned_maintenances.get(pm_id).cloned() else {
        return;
    };
    info!(pm = pm_id, "planned maintenance started");

    // Stage events for everything the PM covers, so the operator sees the
    // full footprint up front.
    let mut targets: Vec<(String, EventData)> = Vec::new();
    match pm.pm_type {
        PmType::Device => {
            for device in state.devices.devices.values() {
                if pm.matches_device(device) {
                    targets.push((device.name.clone(), EventData::Reachability(Default::default())));
                    for color in [AlarmColor::Yellow, AlarmColor::Red] {
                        targets.push((
                            device.name.clone(),
                            EventData::Alarm(AlarmData {
                                alarm_type: color,
                                alarm_count: 0,
                            }),
                        ));
                    }
                }
            }
        }
        PmType::Portstate => {
            for device in state.devices.devices.values() {
                for port in device.ports.values() {
                    if pm.matches_portstate(device, port) {
                        targets.push((
                            device.name.clone(),
                            EventData::Portstate(PortStateData {
                                ifindex: port.ifindex,
                                port: port.ifdescr.clone(),
                                descr: port.ifalias.clone(),
                                ..Default::default()
                            }),
                        ));
                    }
                }
            }
        }
    }

    let mut affected = Vec::new();
    for (router, data) in targets {
        let (mut event, _created) = state.events.get_or_create(&router, data);
        if event.pm.is_none() {
            event.pm = Some(pm_id);
            event.add_log(format!("planned maintenance {pm_id} matches this event"));
        }
        let id = event.id;
        let result = if event.state == EventState::Embryonic {
            state.events.commit_as(event, EventState::Ignored)
        } else {
            let _ = event.set_state(EventState::Ignored, "monitor");
            state.events.commit(event)
        };
        match result {
            Ok(()) => affected.push(id),
            Err(err) => error!(pm = pm_id, event = id, %err, "failed to stage PM event"),
        }
    }

    if let Some(pm) = state.planned_maintenances.get_mut(pm_id) {
        for id in affected {
            if !pm.event_ids.contains(&id) {
                pm.event_ids.push(id);
            }
        }
    }
}

/// Returns a finished PM's events to the open state. Also used by the PM
/// CANCEL command.
pub(crate) fn end_planned_maintenance(state: &mut ZinoState, pm_id: u32) {
    let Some(pm) = state.planned_maintenances.get(pm_id).cloned() else {
        return;
    };
    info!(pm = pm_id, "planned maintenance ended");
    for event_id in pm.event_ids {
        let Ok(mut event) = state.events.checkout(event_id) else {
            continue;
        };
        if event.state != EventState::Ignored {
            continue;
        }
        if event.set_state(EventState::Open, "monitor").is_ok() {
            if let Err(err) = state.events.commit(event) {
                error!(pm = pm_id, event = event_id, %err, "failed to reopen PM event");
            }
        }
    }
}

/// Promotes quiesced flapping ports back to stable and annotates their
/// events.
fn age_flaps(engine: &Engine, _scheduler: &Scheduler) {
    let now = Utc::now();
    let mut state = engine.state();
    let stabilized = state.flapping.age(now);
    for index in stabilized {
        let key = EventKey {
            router: index.router.clone(),
            subindex: SubIndex::Interface(index.ifindex),
            kind: EventKind::PortState,
        };
        let Some(event_id) = state.events.lookup(&key).map(|e| e.id) else {
            continue;
        };
        let port_state = state
            .devices
            .get(&index.router)
            .and_then(|d| d.ports.get(&index.ifindex))
            .and_then(|p| p.state);
        let flap_count = state.flapping.flap_count(&index);

        let Ok(mut event) = state.events.checkout(event_id) else {
            continue;
        };
        if let EventData::Portstate(data) = &mut event.data {
            data.flapstate = Some(FlapState::Stable);
            if let Some(port_state) = port_state {
                data.portstate = Some(port_state);
            }
        }
        event.flaps = Some(flap_count);
        let final_state = port_state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
        event.add_log(format!(
            "{}: ix {} flapping stopped; final state {}",
            index.router, index.ifindex, final_state
        ));
        info!(router = %index.router, ifindex = index.ifindex, "flapping stopped");
        if let Err(err) = state.commit_event(event) {
            error!(event = event_id, %err, "failed to commit stabilized event");
        }
    }
}

/// Archives events closed longer ago than the retention window.
fn archive_expired_events(engine: &Engine, _scheduler: &Scheduler) {
    let cutoff = Utc::now() - chrono::Duration::hours(CLOSED_EVENT_RETENTION_HOURS);
    let removed = engine.state().events.expire_closed(cutoff);
    if removed.is_empty() {
        return;
    }
    let archive_dir = PathBuf::from(&engine.config.archiving.old_events_dir);
    for event in removed {
        match persist::archive_event(&event, &archive_dir) {
            Ok(path) => debug!(event = event.id, file = %path.display(), "event archived"),
            Err(err) => error!(event = event.id, %err, "event archival failed"),
        }
    }
}

/// Periodic state dump with commit-driven pull-forward.
async fn persistence_loop(engine: Engine, token: CancellationToken) {
    let period = Duration::from_secs(engine.config.persistence.period.max(1) * 60);
    let path = PathBuf::from(&engine.config.persistence.file);
    let mut last_dump = Instant::now();
    let mut next = Instant::now() + period;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(next) => {
                let snapshot = Snapshot::capture(&engine.state());
                let target = path.clone();
                let written = tokio::task::spawn_blocking(move || snapshot.write_to_file(&target)).await;
                match written {
                    Ok(Ok(())) => debug!(file = %path.display(), "state dumped"),
                    Ok(Err(err)) => error!(%err, "state dump failed, keeping previous snapshot"),
                    Err(err) => error!(%err, "state dump worker panicked"),
                }
                last_dump = Instant::now();
                next = last_dump + period;
            }
            _ = engine.dump_soon.notified() => {
                let earliest = last_dump + MIN_DUMP_INTERVAL;
                let candidate = earliest.max(Instant::now());
                if candidate < next {
                    next = candidate;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::sim_engine;
    use zino_core::events::{EventState, PortStateData};

    #[test]
    fn test_stagger_offset_is_deterministic_and_bounded() {
        let interval = 300;
        for kind in TaskKind::ALL {
            let a = stagger_offset("arkham-sw1", kind, interval);
            let b = stagger_offset("arkham-sw1", kind, interval);
            assert_eq!(a, b);
            assert!(a < interval);
        }
        // Different devices spread out.
        let offsets: HashSet<u64> = (0..20)
            .map(|i| stagger_offset(&format!("gw-{i}"), TaskKind::LinkState, interval))
            .collect();
        assert!(offsets.len() > 5);
    }

    #[test]
    fn test_reachability_gets_earliest_slot() {
        let interval = 300;
        let reachable = stagger_offset("arkham-sw1", TaskKind::Reachability, interval);
        for kind in TaskKind::ALL {
            assert!(reachable <= stagger_offset("arkham-sw1", kind, interval));
        }
    }

    #[tokio::test]
    async fn test_sync_closes_events_of_removed_devices() {
        let (engine, _) = sim_engine("name: old-gw\naddress: 10.0.0.1\n");
        let scheduler = Scheduler::new(engine.clone());
        scheduler.sync_with_registry();
        assert!(!scheduler.jobs.lock().unwrap().is_empty());

        {
            let mut state = engine.state();
            let (event, _) = state.events.get_or_create(
                "old-gw",
                EventData::Portstate(PortStateData {
                    ifindex: 1,
                    ..Default::default()
                }),
            );
            state.commit_event(event).unwrap();
        }

        engine.swap_registry(DeviceRegistry::default());
        scheduler.sync_with_registry();

        assert!(scheduler.jobs.lock().unwrap().is_empty());
        let state = engine.state();
        assert_eq!(state.events.iter_open().count(), 0);
        assert_eq!(state.events.get(1).unwrap().state, EventState::Closed);
        assert!(!state.devices.contains("old-gw"));
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_one_shot_names_are_deduplicated() {
        let (engine, _) = sim_engine("name: a-gw\naddress: 10.0.0.1\n");
        let scheduler = Scheduler::new(engine);
        let first = scheduler.enqueue_named(
            "a-gw-verify-1-state".to_string(),
            Duration::from_secs(60),
            async {},
        );
        let second = scheduler.enqueue_named(
            "a-gw-verify-1-state".to_string(),
            Duration::from_secs(60),
            async {},
        );
        assert!(first);
        assert!(!second);
        assert_eq!(scheduler.pending_one_shots().len(), 1);
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_pm_start_and_end_toggle_event_state() {
        let (engine, _) = sim_engine("name: blaafjell-gw2\naddress: 10.0.0.1\n");
        let scheduler = Scheduler::new(engine.clone());
        {
            let mut state = engine.state();
            let device = state.devices.get_or_create("blaafjell-gw2");
            let port = device.port_mut(150);
            port.ifdescr = Some("ge-1/0/10".to_string());
            let now = Utc::now();
            state.planned_maintenances.create(
                now - chrono::Duration::seconds(30),
                now + chrono::Duration::seconds(60),
                PmType::Portstate,
                zino_core::pm::MatchType::IntfRegexp,
                "ge-1/0/10".to_string(),
                Some("blaafjell-gw2".to_string()),
            );
        }

        pm_tick(&engine, &scheduler);
        {
            let state = engine.state();
            let event = state.events.iter_open().next().expect("PM staged an event");
            assert_eq!(event.state, EventState::Ignored);
            assert_eq!(event.pm, Some(1));
        }

        // Force the end by rewinding the PM's end time past the last tick.
        {
            let mut state = engine.state();
            state.planned_maintenances.get_mut(1).unwrap().end_time =
                Utc::now() - chrono::Duration::seconds(1);
            state.planned_maintenances.last_run = Some(Utc::now() - chrono::Duration::seconds(2));
        }
        pm_tick(&engine, &scheduler);
        {
            let state = engine.state();
            let event = state.events.iter_open().next().unwrap();
            assert_eq!(event.state, EventState::Open);
        }
        scheduler.cancel_all();
    }
}
