//! Event model and store.
//!
//! An event (or *case*) is a long-lived record of one state anomaly on one
//! device: a port going down, a BGP peer leaving established, a BFD session
//! dropping, a chassis alarm, or the device becoming unreachable. Events are
//! created by polling tasks and trap handlers, then acknowledged and closed
//! by operators through the legacy API.
//!
//! The store enforces the core invariant: at most one non-closed event per
//! `(router, subindex, type)` natural key. Mutation follows a
//! checkout/commit cycle; observers are notified synchronously on every
//! commit that actually changed something.

mod store;
mod types;

pub use store::{EventObserverFn, Events};
pub use types::{
    AlarmColor, AlarmData, BfdData, BgpData, Event, EventData, EventKey, EventKind, EventState,
    FlapState, LogEntry, PortStateData, ReachabilityData, ReachabilityStatus, SubIndex,
};
