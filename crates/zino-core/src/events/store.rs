//! The indexed event collection.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::events::types::{Event, EventData, EventKey, EventState};

/// Observer invoked synchronously on every commit that changed something.
/// Receives the committed event and the prior snapshot (None on creation).
///
/// Observers run on the committing task's stack while the state lock is
/// held; they must not re-enter the store.
pub type EventObserverFn = Box<dyn Fn(&Event, Option<&Event>) + Send>;

/// Indexed collection of events plus a secondary index for recently-closed
/// events.
#[derive(Default)]
pub struct Events {
    events: BTreeMap<u32, Event>,
    index: HashMap<EventKey, u32>,
    closed_index: HashMap<EventKey, u32>,
    last_event_id: u32,
    observers: Vec<EventObserverFn>,
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("count", &self.events.len())
            .field("open_index", &self.index.len())
            .field("closed_index", &self.closed_index.len())
            .field("last_event_id", &self.last_event_id)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted parts, deduplicating as needed.
    ///
    /// If two non-closed events share a natural key, the oldest-opened one
    /// is kept and the rest are force-closed with a history note.
    pub fn from_parts(events: Vec<Event>, last_event_id: u32) -> Self {
        let mut store = Self {
            last_event_id,
            ..Self::default()
        };
        for event in events {
            store.last_event_id = store.last_event_id.max(event.id);
            store.events.insert(event.id, event);
        }
        store.rebuild_indexes();
        store
    }

    /// Returns the events and id counter for snapshotting.
    pub fn snapshot_parts(&self) -> (Vec<Event>, u32) {
        (self.events.values().cloned().collect(), self.last_event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_event_id(&self) -> u32 {
        self.last_event_id
    }

    pub fn get(&self, id: u32) -> Option<&Event> {
        self.events.get(&id)
    }

    /// Returns a mutable working copy of the event with the given id.
    pub fn checkout(&self, id: u32) -> Result<Event> {
        self.events.get(&id).cloned().ok_or(CoreError::NoSuchEvent(id))
    }

    /// Returns the single open event for the natural key of `data`, or
    /// stages a fresh embryonic event.
    ///
    /// Idempotent per key: concurrent callers get the same id, because the
    /// embryonic event is indexed immediately (it stays invisible to
    /// operator queries until committed). If the key was recently closed,
    /// the fresh event gets a history back-reference to the closed one.
    pub fn get_or_create(&mut self, router: &str, data: EventData) -> (Event, bool) {
        let key = EventKey {
            router: router.to_string(),
            subindex: data.subindex(),
            kind: data.kind(),
        };
        if let Some(&id) = self.index.get(&key) {
            return (self.events[&id].clone(), false);
        }

        self.last_event_id += 1;
        let id = self.last_event_id;
        let mut event = Event::new(id, router, data);
        if let Some(&closed_id) = self.closed_index.get(&key) {
            event.add_history(format!("see also closed event {closed_id}"));
        }
        debug!(event = id, router, key = ?key, "staged new event");
        self.events.insert(id, event.clone());
        self.index.insert(key, id);
        (event, true)
    }

    /// Looks up the open event for a natural key without creating one.
    pub fn lookup(&self, key: &EventKey) -> Option<&Event> {
        self.index.get(key).map(|id| &self.events[id])
    }

    /// Looks up a recently-closed event for a natural key.
    pub fn lookup_closed(&self, key: &EventKey) -> Option<&Event> {
        self.closed_index.get(key).map(|id| &self.events[id])
    }

    /// Commits a working copy back to the store, opening embryonic events.
    pub fn commit(&mut self, event: Event) -> Result<()> {
        self.commit_as(event, EventState::Open)
    }

    /// Commits a working copy, using `open_as` as the post-staging state for
    /// embryonic events (planned maintenance suppression commits as
    /// `Ignored`).
    ///
    /// Observers fire only when the commit actually changed something; a
    /// first commit fires twice, once with the embryonic snapshot and once
    /// after the automatic transition out of staging.
    pub fn commit_as(&mut self, mut event: Event, open_as: EventState) -> Result<()> {
        let old = self
            .events
            .get(&event.id)
            .cloned()
            .ok_or(CoreError::NoSuchEvent(event.id))?;

        if event.state == EventState::Embryonic {
            // Announce the staged event before it leaves the embryonic
            // state, so subscribers see the full lifecycle.
            self.call_observers(&event, None);
            event.set_state(open_as, "monitor")?;
        }

        if old.state != EventState::Closed {
            event.updated = Utc::now();
        }

        let key = event.key();
        if event.state == EventState::Closed {
            if event.closed.is_none() {
                event.closed = Some(Utc::now());
            }
            if self.index.get(&key) == Some(&event.id) {
                self.index.remove(&key);
            }
            self.closed_index.insert(key, event.id);
        } else {
            self.index.insert(key, event.id);
        }

        let id = event.id;
        let changed = event.diff_fields(&old);
        self.events.insert(id, event);
        if !changed.is_empty() {
            self.call_observers(&self.events[&id], Some(&old));
        }
        Ok(())
    }

    /// Closes an event with a reason line, on behalf of `user`.
    pub fn close(&mut self, id: u32, reason: &str, user: &str) -> Result<()> {
        let mut event = self.checkout(id)?;
        event.add_history(reason.to_string());
        event.set_state(EventState::Closed, user)?;
        self.commit(event)
    }

    /// All events an operator can list: everything except closed and the
    /// embryonic staging entries.
    pub fn iter_open(&self) -> impl Iterator<Item = &Event> {
        self.events
            .values()
            .filter(|e| e.state != EventState::Closed && e.state != EventState::Embryonic)
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn register_observer(&mut self, observer: EventObserverFn) {
        self.observers.push(observer);
    }

    /// Removes events that have been closed since before `cutoff` and
    /// returns them for archival. Secondary index entries are pruned too.
    pub fn expire_closed(&mut self, cutoff: DateTime<Utc>) -> Vec<Event> {
        let expired: Vec<u32> = self
            .events
            .values()
            .filter(|e| {
                e.state == EventState::Closed && e.closed.map(|c| c < cutoff).unwrap_or(false)
            })
            .map(|e| e.id)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(event) = self.events.remove(&id) {
                let key = event.key();
                if self.closed_index.get(&key) == Some(&id) {
                    self.closed_index.remove(&key);
                }
                removed.push(event);
            }
        }
        removed
    }

    fn call_observers(&self, event: &Event, old: Option<&Event>) {
        for observer in &self.observers {
            observer(event, old);
        }
    }

    /// Rebuilds both natural-key indexes from the event map, force-closing
    /// duplicate non-closed events (oldest-opened wins).
    fn rebuild_indexes(&mut self) {
        self.index.clear();
        self.closed_index.clear();

        let mut by_key: HashMap<EventKey, Vec<u32>> = HashMap::new();
        for event in self.events.values() {
            if event.state == EventState::Closed {
                self.closed_index.insert(event.key(), event.id);
            } else {
                by_key.entry(event.key()).or_default().push(event.id);
            }
        }

        for (key, mut ids) in by_key {
            ids.sort_by_key(|id| self.events[id].opened);
            let keeper = ids[0];
            self.index.insert(key.clone(), keeper);
            for id in &ids[1..] {
                let event = self.events.get_mut(id).expect("indexed event must exist");
                event.add_history(format!(
                    "duplicate of event {keeper}, closed during state load"
                ));
                let _ = event.set_state(EventState::Closed, "monitor");
                debug!(event = id, kept = keeper, "closed duplicate event at load");
                self.closed_index.insert(key.clone(), *id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::events::types::{PortStateData, ReachabilityData};

    fn reachability() -> EventData {
        EventData::Reachability(ReachabilityData::default())
    }

    fn portstate(ifindex: u32) -> EventData {
        EventData::Portstate(PortStateData {
            ifindex,
            ..Default::default()
        })
    }

    #[test]
    fn test_initial_store_is_empty() {
        let events = Events::new();
        assert_eq!(events.len(), 0);
        assert_eq!(events.last_event_id(), 0);
    }

    #[test]
    fn test_get_or_create_is_idempotent_per_key() {
        let mut events = Events::new();
        let (first, created) = events.get_or_create("example-gw", portstate(1));
        assert!(created);
        let (second, created) = events.get_or_create("example-gw", portstate(1));
        assert!(!created);
        assert_eq!(first.id, second.id);

        // A different subindex yields a different event.
        let (third, created) = events.get_or_create("example-gw", portstate(2));
        assert!(created);
        assert_ne!(third.id, first.id);
    }

    #[test]
    fn test_commit_opens_embryonic_event() {
        let mut events = Events::new();
        let (event, _) = events.get_or_create("example-gw", reachability());
        assert_eq!(event.state, EventState::Embryonic);
        events.commit(event).unwrap();
        let stored = events.get(1).unwrap();
        assert_eq!(stored.state, EventState::Open);
        assert_eq!(
            stored.history[0].message,
            "state change embryonic -> open (monitor)"
        );
    }

    #[test]
    fn test_commit_fires_observers_embryonic_then_open() {
        let mut events = Events::new();
        let seen: Arc<Mutex<Vec<(EventState, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.register_observer(Box::new(move |event, old| {
            seen_clone.lock().unwrap().push((event.state, old.is_some()));
        }));

        let (event, _) = events.get_or_create("example-gw", portstate(150));
        events.commit(event).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (EventState::Embryonic, false));
        assert_eq!(seen[1], (EventState::Open, true));
    }

    #[test]
    fn test_commit_without_changes_is_silent() {
        let mut events = Events::new();
        let (event, _) = events.get_or_create("example-gw", portstate(150));
        events.commit(event).unwrap();

        let calls = Arc::new(Mutex::new(0usize));
        let calls_clone = calls.clone();
        events.register_observer(Box::new(move |_, _| {
            *calls_clone.lock().unwrap() += 1;
        }));

        let unchanged = events.checkout(1).unwrap();
        events.commit(unchanged).unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_checkout_returns_deep_copy() {
        let mut events = Events::new();
        let (event, _) = events.get_or_create("example-gw", portstate(150));
        events.commit(event).unwrap();

        let mut copy = events.checkout(1).unwrap();
        copy.add_log("only on the copy");
        assert!(events.get(1).unwrap().log.is_empty());
    }

    #[test]
    fn test_closed_event_moves_to_secondary_index() {
        let mut events = Events::new();
        let (event, _) = events.get_or_create("example-gw", portstate(150));
        events.commit(event).unwrap();
        events.close(1, "fixed", "operator").unwrap();

        let key = events.get(1).unwrap().key();
        assert!(events.lookup(&key).is_none());
        assert_eq!(events.lookup_closed(&key).unwrap().id, 1);

        // A new anomaly on the same key creates a fresh event with a
        // back-reference, never resurrecting the closed one.
        let (fresh, created) = events.get_or_create("example-gw", portstate(150));
        assert!(created);
        assert_ne!(fresh.id, 1);
        assert!(fresh.history[0].message.contains("closed event 1"));
    }

    #[test]
    fn test_close_is_terminal() {
        let mut events = Events::new();
        let (event, _) = events.get_or_create("example-gw", reachability());
        events.commit(event).unwrap();
        events.close(1, "done", "operator").unwrap();

        let mut reopened = events.checkout(1).unwrap();
        assert!(reopened.set_state(EventState::Open, "operator").is_err());
    }

    #[test]
    fn test_iter_open_hides_embryonic_and_closed() {
        let mut events = Events::new();
        let (committed, _) = events.get_or_create("a-gw", portstate(1));
        events.commit(committed).unwrap();
        let (_staged, _) = events.get_or_create("b-gw", portstate(1));
        let (closing, _) = events.get_or_create("c-gw", portstate(1));
        events.commit(closing).unwrap();
        events.close(3, "done", "op").unwrap();

        let open: Vec<u32> = events.iter_open().map(|e| e.id).collect();
        assert_eq!(open, vec![1]);
    }

    #[test]
    fn test_expire_closed_prunes_event_and_index() {
        let mut events = Events::new();
        let (event, _) = events.get_or_create("example-gw", portstate(150));
        events.commit(event).unwrap();
        events.close(1, "done", "op").unwrap();

        // Nothing expires before the cutoff passes.
        let removed = events.expire_closed(Utc::now() - chrono::Duration::hours(8));
        assert!(removed.is_empty());

        let removed = events.expire_closed(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, 1);
        assert!(events.get(1).is_none());
        assert!(events.lookup_closed(&removed[0].key()).is_none());
    }

    #[test]
    fn test_load_deduplicates_open_events() {
        let mut source = Events::new();
        let (a, _) = source.get_or_create("example-gw", portstate(150));
        source.commit(a).unwrap();
        let (events_list, last_id) = source.snapshot_parts();

        // Forge a duplicate of the same natural key with a later open time.
        let mut duplicate = events_list[0].clone();
        duplicate.id = 7;
        duplicate.opened = duplicate.opened + chrono::Duration::seconds(30);
        let mut all = events_list;
        all.push(duplicate);

        let store = Events::from_parts(all, last_id.max(7));
        let open: Vec<u32> = store.iter_open().map(|e| e.id).collect();
        assert_eq!(open, vec![1]);
        let dup = store.get(7).unwrap();
        assert_eq!(dup.state, EventState::Closed);
        assert!(dup
            .history
            .iter()
            .any(|entry| entry.message.contains("duplicate of event 1")));
    }

    #[test]
    fn test_last_event_id_is_monotone_across_reload() {
        let mut source = Events::new();
        let (event, _) = source.get_or_create("example-gw", portstate(150));
        source.commit(event).unwrap();
        let (_, last_id) = source.snapshot_parts();

        // Reload with all events archived away; the counter must survive.
        let mut reloaded = Events::from_parts(Vec::new(), last_id);
        let (fresh, _) = reloaded.get_or_create("example-gw", portstate(150));
        assert!(fresh.id > last_id - 1);
        assert_eq!(fresh.id, last_id + 1);
    }
}
