//! Store-local mapping between global sync ids and local primary keys.

use crate::change_feed::CollectionListener;
use crate::entity::LocalId;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct TypeEntries {
    by_sync: HashMap<Uuid, LocalId>,
    by_local: HashMap<LocalId, Uuid>,
}

/// Per-store cache of `(type_name, sync_id) -> local_id`.
///
/// Entries are created lazily while a store's rows are scanned and kept
/// current by the repository commit hook, so a cached entry never outlives
/// its row. An alias maps a foreign sync id to a row that kept its own id
/// (custom lookup matches); aliases resolve in `get_local_id` only.
#[derive(Debug, Default)]
pub struct IdCache {
    types: RwLock<HashMap<String, TypeEntries>>,
}

impl IdCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the local id for a global id.
    pub fn get_local_id(&self, type_name: &str, sync_id: Uuid) -> Option<LocalId> {
        self.types
            .read()
            .get(type_name)
            .and_then(|entries| entries.by_sync.get(&sync_id).copied())
    }

    /// Returns the canonical global id of a local row.
    pub fn get_sync_id(&self, type_name: &str, local_id: LocalId) -> Option<Uuid> {
        self.types
            .read()
            .get(type_name)
            .and_then(|entries| entries.by_local.get(&local_id).copied())
    }

    /// Records the canonical mapping for a row.
    pub fn set(&self, type_name: &str, sync_id: Uuid, local_id: LocalId) {
        let mut types = self.types.write();
        let entries = types.entry(type_name.to_string()).or_default();
        Self::insert(entries, sync_id, local_id);
    }

    /// Records `alias` as another name for `local_id`.
    pub fn set_alias(&self, type_name: &str, alias: Uuid, local_id: LocalId) {
        self.types
            .write()
            .entry(type_name.to_string())
            .or_default()
            .by_sync
            .insert(alias, local_id);
    }

    /// Removes the entry for a global id, and every alias of its row.
    pub fn remove(&self, type_name: &str, sync_id: Uuid) -> Option<LocalId> {
        let mut types = self.types.write();
        let entries = types.get_mut(type_name)?;
        Self::remove_row(entries, sync_id)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.types.write().clear();
    }

    /// Number of canonical entries across all types.
    pub fn len(&self) -> usize {
        self.types.read().values().map(|e| e.by_local.len()).sum()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(entries: &mut TypeEntries, sync_id: Uuid, local_id: LocalId) {
        // A row whose sync id changed drops its old canonical entry
        if let Some(previous) = entries.by_local.insert(local_id, sync_id) {
            if previous != sync_id {
                entries.by_sync.remove(&previous);
            }
        }
        entries.by_sync.insert(sync_id, local_id);
    }

    fn remove_row(entries: &mut TypeEntries, sync_id: Uuid) -> Option<LocalId> {
        let local_id = entries.by_sync.remove(&sync_id)?;
        entries.by_local.remove(&local_id);
        entries.by_sync.retain(|_, l| *l != local_id);
        Some(local_id)
    }
}

impl CollectionListener for IdCache {
    fn on_collection_changed(
        &self,
        type_name: &str,
        added: &[(Uuid, LocalId)],
        removed: &[(Uuid, LocalId)],
    ) {
        let mut types = self.types.write();
        let entries = types.entry(type_name.to_string()).or_default();
        for (sync_id, _) in removed {
            Self::remove_row(entries, *sync_id);
        }
        for (sync_id, local_id) in added {
            Self::insert(entries, *sync_id, *local_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let cache = IdCache::new();
        let id = Uuid::new_v4();
        cache.set("Address", id, LocalId(7));

        assert_eq!(cache.get_local_id("Address", id), Some(LocalId(7)));
        assert_eq!(cache.get_sync_id("Address", LocalId(7)), Some(id));
        assert_eq!(cache.get_local_id("Person", id), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_drops_aliases() {
        let cache = IdCache::new();
        let own = Uuid::new_v4();
        let alias = Uuid::new_v4();
        cache.set("Address", own, LocalId(1));
        cache.set_alias("Address", alias, LocalId(1));

        assert_eq!(cache.get_local_id("Address", alias), Some(LocalId(1)));
        assert_eq!(cache.get_sync_id("Address", LocalId(1)), Some(own));

        assert_eq!(cache.remove("Address", own), Some(LocalId(1)));
        assert_eq!(cache.get_local_id("Address", alias), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn changed_sync_id_replaces_entry() {
        let cache = IdCache::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        cache.set("Address", old, LocalId(2));
        cache.set("Address", new, LocalId(2));

        assert_eq!(cache.get_local_id("Address", old), None);
        assert_eq!(cache.get_local_id("Address", new), Some(LocalId(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn listener_applies_commit() {
        let cache = IdCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.on_collection_changed("Person", &[(a, LocalId(1)), (b, LocalId(2))], &[]);
        assert_eq!(cache.len(), 2);

        cache.on_collection_changed("Person", &[], &[(a, LocalId(1))]);
        assert_eq!(cache.get_local_id("Person", a), None);
        assert_eq!(cache.get_local_id("Person", b), Some(LocalId(2)));
    }

    #[test]
    fn clear_empties_everything() {
        let cache = IdCache::new();
        cache.set("Address", Uuid::new_v4(), LocalId(1));
        cache.set("Person", Uuid::new_v4(), LocalId(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
