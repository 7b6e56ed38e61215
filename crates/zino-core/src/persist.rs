//! State snapshot persistence and closed-event archival.
//!
//! The entire in-memory core serializes to a single JSON document so the
//! process can crash-recover and be hot-standby-replicated by file copy.
//! Writes go through a temp file, fsync and atomic rename so a crash never
//! leaves a torn snapshot. On load, unknown fields are ignored and missing
//! fields take defaults, so older snapshots keep working.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::device::DeviceState;
use crate::error::Result;
use crate::events::{Event, Events};
use crate::flaps::FlappingStates;
use crate::pm::{PlannedMaintenance, PlannedMaintenances};
use crate::state::ZinoState;

/// Hours a closed event stays addressable before it is archived to disk.
pub const CLOSED_EVENT_RETENTION_HOURS: i64 = 8;

/// The on-disk snapshot document.
///
/// Capturing is cheap (pure clone under the state lock); serializing and
/// writing can then happen off the main loop.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    events: Vec<Event>,
    #[serde(default)]
    devices: std::collections::BTreeMap<String, DeviceState>,
    #[serde(default)]
    planned_maintenances: Vec<PlannedMaintenance>,
    #[serde(default)]
    flapping: FlappingStates,
    #[serde(default)]
    addresses: HashMap<IpAddr, String>,
    #[serde(default)]
    last_event_id: u32,
}

impl Snapshot {
    /// Clones the serializable parts of the state.
    pub fn capture(state: &ZinoState) -> Self {
        Self::from_state(state)
    }

    /// Serializes this snapshot to `path` via temp file + fsync + rename.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        write_json_atomically(self, path)
    }

    fn from_state(state: &ZinoState) -> Self {
        let (events, last_event_id) = state.events.snapshot_parts();
        Self {
            events,
            devices: state.devices.devices.clone(),
            planned_maintenances: state.planned_maintenances.snapshot_parts(),
            flapping: state.flapping.clone(),
            addresses: state.addresses.clone(),
            last_event_id,
        }
    }

    fn into_state(self) -> ZinoState {
        let mut state = ZinoState::new();
        state.devices.devices = self.devices;
        state.events = Events::from_parts(self.events, self.last_event_id);
        state.planned_maintenances = PlannedMaintenances::from_parts(self.planned_maintenances);
        state.flapping = self.flapping;
        state.addresses = self.addresses;
        state
    }
}

/// Serializes the full state to `path` via temp file + fsync + rename.
pub fn dump_state_to_file(state: &ZinoState, path: &Path) -> Result<()> {
    debug!(file = %path.display(), "dumping state");
    Snapshot::capture(state).write_to_file(path)
}

/// Loads a previously persisted state.
///
/// Returns `Ok(None)` if no snapshot exists; a present-but-invalid snapshot
/// is the caller's problem to handle.
pub fn load_state_from_file(path: &Path) -> Result<Option<ZinoState>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            error!(file = %path.display(), "no state file found, starting from scratch");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    info!(file = %path.display(), "loading saved state");
    let snapshot: Snapshot = serde_json::from_str(&content)?;
    Ok(Some(snapshot.into_state()))
}

/// Writes an expired closed event to its date-sharded archive file,
/// returning the path written.
pub fn archive_event(event: &Event, archive_dir: &Path) -> Result<PathBuf> {
    let closed = event.closed.unwrap_or_else(Utc::now);
    let dir = archive_shard_dir(archive_dir, closed);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", event.id));
    write_json_atomically(event, &path)?;
    debug!(event = event.id, file = %path.display(), "archived expired event");
    Ok(path)
}

/// `<archive-dir>/YYYY/MM/DD` with zero-padded date parts.
pub fn archive_shard_dir(archive_dir: &Path, when: DateTime<Utc>) -> PathBuf {
    archive_dir
        .join(format!("{:04}", when.year()))
        .join(format!("{:02}", when.month()))
        .join(format!("{:02}", when.day()))
}

fn write_json_atomically<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        let json = serde_json::to_string_pretty(value)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventData, PortStateData};
    use crate::flaps::PortIndex;

    fn portstate(ifindex: u32) -> EventData {
        EventData::Portstate(PortStateData {
            ifindex,
            ..Default::default()
        })
    }

    fn populated_state() -> ZinoState {
        let mut state = ZinoState::new();
        state.note_device_address("arkham-sw1", "10.0.42.1".parse().unwrap());
        let (event, _) = state.events.get_or_create("arkham-sw1", portstate(150));
        state.commit_event(event).unwrap();
        state.flapping.update(&PortIndex::new("arkham-sw1", 150), true);
        state
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zino-state.json");
        let state = populated_state();
        dump_state_to_file(&state, &path).unwrap();

        let restored = load_state_from_file(&path).unwrap().unwrap();
        assert_eq!(restored.events.len(), 1);
        assert_eq!(restored.events.last_event_id(), state.events.last_event_id());
        assert!(restored.devices.contains("arkham-sw1"));
        assert_eq!(
            restored.device_for_address("10.0.42.1".parse().unwrap()),
            Some("arkham-sw1")
        );
        assert_eq!(
            restored.flapping.flap_count(&PortIndex::new("arkham-sw1", 150)),
            1
        );
    }

    #[test]
    fn test_snapshot_document_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zino-state.json");
        dump_state_to_file(&populated_state(), &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for key in [
            "events",
            "devices",
            "planned_maintenances",
            "flapping",
            "addresses",
            "last_event_id",
        ] {
            assert!(json.get(key).is_some(), "snapshot missing key {key}");
        }
    }

    #[test]
    fn test_missing_snapshot_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_state_from_file(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_unknown_fields_are_ignored_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zino-state.json");
        fs::write(
            &path,
            r#"{"last_event_id": 9, "some_future_field": {"x": 1}}"#,
        )
        .unwrap();
        let state = load_state_from_file(&path).unwrap().unwrap();
        assert_eq!(state.events.last_event_id(), 9);
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zino-state.json");
        dump_state_to_file(&populated_state(), &path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_archive_path_is_date_sharded_and_padded() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = populated_state();
        state.events.close(1, "done", "op").unwrap();
        let mut event = state.events.checkout(1).unwrap();
        event.closed = Some("2026-03-07T12:00:00Z".parse().unwrap());

        let path = archive_event(&event, dir.path()).unwrap();
        assert!(path.ends_with("2026/03/07/1.json"));
        let content = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["type"], "portstate");
    }
}
