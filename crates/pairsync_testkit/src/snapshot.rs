//! JSON snapshots of sample stores.
//!
//! A snapshot holds every row and tombstone of a [`MemoryDatabase`]
//! registered for the sample types. The CLI syncs two snapshot files; tests
//! use snapshots to persist a store between runs.

use crate::fixtures::{Address, LogEvent, Person};
use pairsync_core::{CoreError, MemoryDatabase, SyncEntity, Tombstone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors from loading or saving a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// File could not be read or written.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    /// File is not a valid snapshot.
    #[error("snapshot format error: {0}")]
    Json(#[from] serde_json::Error),
    /// Rows could not be restored.
    #[error("snapshot restore error: {0}")]
    Core(#[from] CoreError),
}

/// Content of one sample store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Addresses.
    #[serde(default)]
    pub addresses: Vec<Address>,
    /// People.
    #[serde(default)]
    pub people: Vec<Person>,
    /// Log events.
    #[serde(default)]
    pub log_events: Vec<LogEvent>,
    /// Permanent deletes, by type name.
    #[serde(default)]
    pub tombstones: BTreeMap<String, Vec<Tombstone>>,
}

impl StoreSnapshot {
    /// Copies the content of `db`.
    pub fn capture(db: &MemoryDatabase) -> SnapshotResult<Self> {
        let mut tombstones = BTreeMap::new();
        Ok(Self {
            addresses: capture_rows(db, &mut tombstones)?,
            people: capture_rows(db, &mut tombstones)?,
            log_events: capture_rows(db, &mut tombstones)?,
            tombstones,
        })
    }

    /// Replaces the content of `db` with this snapshot.
    pub fn restore(&self, db: &MemoryDatabase) -> SnapshotResult<()> {
        restore_rows(db, self.addresses.clone(), &self.tombstones)?;
        restore_rows(db, self.people.clone(), &self.tombstones)?;
        restore_rows(db, self.log_events.clone(), &self.tombstones)?;
        Ok(())
    }

    /// Reads a snapshot file. A missing file is an empty store.
    pub fn load(path: &Path) -> SnapshotResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the snapshot as pretty JSON.
    pub fn save(&self, path: &Path) -> SnapshotResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Row counts by type name.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        BTreeMap::from([
            (Address::TYPE_NAME, self.addresses.len()),
            (Person::TYPE_NAME, self.people.len()),
            (LogEvent::TYPE_NAME, self.log_events.len()),
        ])
    }
}

fn capture_rows<T: SyncEntity>(
    db: &MemoryDatabase,
    tombstones: &mut BTreeMap<String, Vec<Tombstone>>,
) -> SnapshotResult<Vec<T>> {
    let repo = db.memory_repository::<T>()?;
    let removed = repo.all_tombstones();
    if !removed.is_empty() {
        tombstones.insert(T::TYPE_NAME.to_string(), removed);
    }
    Ok(repo.rows())
}

fn restore_rows<T: SyncEntity>(
    db: &MemoryDatabase,
    rows: Vec<T>,
    tombstones: &BTreeMap<String, Vec<Tombstone>>,
) -> SnapshotResult<()> {
    let removed = tombstones.get(T::TYPE_NAME).cloned().unwrap_or_default();
    db.memory_repository::<T>()?.restore(rows, removed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::TestPeer;
    use pairsync_core::Database;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_preserves_content() {
        let peer = TestPeer::new("p");
        let home = peer.insert(Address::new("1 Main St", "Springfield", peer.now()));
        let person = peer.insert(Person::new("Ann", &home, peer.now()));
        let doomed = peer.insert(Address::new("9 Gone Rd", "Nowhere", peer.now()));
        peer.remove::<Address>(doomed.sync_id);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let snapshot = StoreSnapshot::capture(&peer.db).unwrap();
        snapshot.save(&path).unwrap();

        let loaded = StoreSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.counts()["Address"], 1);
        assert_eq!(loaded.tombstones["Address"].len(), 1);

        let copy = TestPeer::new("copy");
        loaded.restore(&copy.db).unwrap();
        assert_eq!(copy.find::<Person>(person.sync_id), Some(person));
        assert_eq!(copy.db.id_cache().get_local_id("Address", home.sync_id), home.id);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let snapshot = StoreSnapshot::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(snapshot, StoreSnapshot::default());
    }

    #[test]
    fn garbage_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            StoreSnapshot::load(&path),
            Err(SnapshotError::Json(_))
        ));
    }
}
