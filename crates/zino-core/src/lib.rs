//! State engine for the Zino network monitor.
//!
//! This crate holds everything the `zinod` daemon needs to persist between
//! runtimes: the event store with its lifecycle and deduplication rules, the
//! per-device observation cache, flap tracking, planned maintenance, the
//! configuration model, and the JSON snapshot persistence layer.
//!
//! # Architecture
//!
//! ```text
//! polldevs.cf ──> config::polldevs ──> device registry (zinod)
//!                                            │
//!   SNMP polls / traps (zinod) ──────────────┤
//!                                            ▼
//!                    ┌────────────── ZinoState ──────────────┐
//!                    │  DeviceStates   Events   FlappingStates│
//!                    │  PlannedMaintenances     addresses     │
//!                    └──────────────────┬─────────────────────┘
//!                                       │ observers
//!                                       ▼
//!                        notify channels / state dumps
//! ```
//!
//! All state mutation happens on a single cooperative executor; the types in
//! this crate are plain data guarded by the daemon's one lock and never
//! perform I/O of their own (except [`persist`], which owns the snapshot
//! files).

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod flaps;
pub mod persist;
pub mod pm;
pub mod state;

pub use error::{CoreError, Result};
pub use state::ZinoState;
