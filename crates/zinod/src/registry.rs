//! The device registry: an immutable snapshot of the parsed pollfile.
//!
//! Consumers hold an `Arc<DeviceRegistry>`; reloads build a fresh registry
//! and swap it atomically, so readers see either the old or the new device
//! set, never a partial one. A failed reload keeps the previous registry.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, warn};

use zino_core::config::polldevs::{read_polldevs, PollDevice};
use zino_core::error::Result;

/// Parsed view of the pollfile.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    pub devices: BTreeMap<String, PollDevice>,
    /// Modification time of the pollfile this registry was built from.
    pub mtime: Option<SystemTime>,
}

/// The job-relevant difference between two registries.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl DeviceRegistry {
    /// Loads a registry from the pollfile.
    pub fn load(path: &Path) -> Result<Self> {
        let devices = read_polldevs(path)?;
        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        debug!(count = devices.len(), file = %path.display(), "loaded pollfile");
        Ok(Self { devices, mtime })
    }

    pub fn get(&self, name: &str) -> Option<&PollDevice> {
        self.devices.get(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// True if the pollfile has been modified since this registry was built.
    pub fn is_stale(&self, path: &Path) -> bool {
        let current = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        match (self.mtime, current) {
            (Some(old), Some(new)) => new > old,
            (None, Some(_)) => true,
            _ => {
                warn!(file = %path.display(), "cannot stat pollfile");
                false
            }
        }
    }

    /// Computes which devices were added, removed or changed versus `old`.
    pub fn diff(&self, old: &DeviceRegistry) -> RegistryDiff {
        let mut diff = RegistryDiff::default();
        for name in self.devices.keys() {
            match old.devices.get(name) {
                None => diff.added.push(name.clone()),
                Some(old_device) if old_device != &self.devices[name] => {
                    diff.changed.push(name.clone());
                }
                Some(_) => {}
            }
        }
        for name in old.devices.keys() {
            if !self.devices.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }
        diff
    }
}
