//! In-memory reference store.
//!
//! `MemoryDatabase` holds one `MemoryRepository<T>` per registered entity
//! type. It is the store used by the CLI, the tests and the benches, and it
//! shows what a storage engine has to provide to be synchronized:
//!
//! - staged writes committed by `save()`
//! - local id allocation from a configurable sequence
//! - tombstones for permanent deletes
//! - a commit hook that keeps the ID cache in step with the rows

use crate::change_feed::{ChangeFeed, CollectionListener};
use crate::entity::{LocalId, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::id_cache::IdCache;
use crate::object::Tombstone;
use crate::repository::{Database, Repository};
use crate::time::{Clock, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

enum Pending<T> {
    Add(T),
    Update(T),
    Remove(LocalId),
}

enum Undo<T> {
    Inserted(LocalId, Uuid),
    Replaced(T),
    Removed(T),
}

struct State<T> {
    rows: BTreeMap<LocalId, T>,
    by_sync: HashMap<Uuid, LocalId>,
    next_id: i64,
    tombstones: Vec<Tombstone>,
}

impl<T: SyncEntity> State<T> {
    fn allocate(&mut self, step: i64) -> LocalId {
        while self.rows.contains_key(&LocalId(self.next_id)) {
            self.next_id += step;
        }
        let id = LocalId(self.next_id);
        self.next_id += step;
        id
    }

    fn undo(&mut self, log: Vec<Undo<T>>, tombstones_len: usize) {
        for entry in log.into_iter().rev() {
            match entry {
                Undo::Inserted(id, sync_id) => {
                    self.rows.remove(&id);
                    self.by_sync.remove(&sync_id);
                }
                Undo::Replaced(old) | Undo::Removed(old) => {
                    if let Some(id) = old.local_id() {
                        if let Some(current) = self.rows.get(&id) {
                            self.by_sync.remove(&current.sync_id());
                        }
                        self.by_sync.insert(old.sync_id(), id);
                        self.rows.insert(id, old);
                    }
                }
            }
        }
        self.tombstones.truncate(tombstones_len);
    }
}

/// An in-memory repository.
pub struct MemoryRepository<T> {
    state: RwLock<State<T>>,
    pending: Mutex<Vec<Pending<T>>>,
    clock: Arc<dyn Clock>,
    id_step: i64,
    feed: ChangeFeed,
}

impl<T: SyncEntity> MemoryRepository<T> {
    /// Creates an empty repository allocating ids `start, start + step, ...`.
    pub fn new(clock: Arc<dyn Clock>, id_start: i64, id_step: i64) -> Self {
        Self {
            state: RwLock::new(State {
                rows: BTreeMap::new(),
                by_sync: HashMap::new(),
                next_id: id_start,
                tombstones: Vec::new(),
            }),
            pending: Mutex::new(Vec::new()),
            clock,
            id_step: id_step.max(1),
            feed: ChangeFeed::new(),
        }
    }

    /// The repository's change feed.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Every committed row, in local id order.
    pub fn rows(&self) -> Vec<T> {
        self.state.read().rows.values().cloned().collect()
    }

    /// Every recorded tombstone.
    pub fn all_tombstones(&self) -> Vec<Tombstone> {
        self.state.read().tombstones.clone()
    }

    /// Replaces the whole content, as when loading a snapshot.
    ///
    /// Rows must carry local ids. Listeners see every row as added.
    pub fn restore(&self, rows: Vec<T>, tombstones: Vec<Tombstone>) -> CoreResult<()> {
        let mut state = self.state.write();
        let mut restored = BTreeMap::new();
        let mut by_sync = HashMap::new();
        for row in rows {
            let id = row.local_id().ok_or_else(|| CoreError::InvalidStatus {
                type_name: T::TYPE_NAME.to_string(),
                message: format!("row {} has no local id", row.sync_id()),
            })?;
            if by_sync.insert(row.sync_id(), id).is_some() {
                return Err(CoreError::DuplicateSyncId {
                    type_name: T::TYPE_NAME.to_string(),
                    sync_id: row.sync_id(),
                });
            }
            if restored.insert(id, row).is_some() {
                return Err(CoreError::DuplicateLocalId {
                    type_name: T::TYPE_NAME.to_string(),
                    local_id: id.get(),
                });
            }
        }

        let removed: Vec<_> = state.by_sync.iter().map(|(s, l)| (*s, *l)).collect();
        let added: Vec<_> = by_sync.iter().map(|(s, l)| (*s, *l)).collect();
        if let Some(max) = restored.keys().next_back() {
            state.next_id = state.next_id.max(max.get() + self.id_step);
        }
        state.rows = restored;
        state.by_sync = by_sync;
        state.tombstones = tombstones;
        self.pending.lock().clear();

        self.feed.emit(T::TYPE_NAME, added, removed);
        Ok(())
    }
}

impl<T: SyncEntity> Repository<T> for MemoryRepository<T> {
    fn add(&self, entity: T) {
        self.pending.lock().push(Pending::Add(entity));
    }

    fn update(&self, entity: T) {
        self.pending.lock().push(Pending::Update(entity));
    }

    fn remove(&self, predicate: &dyn Fn(&T) -> bool) -> usize {
        let ids: Vec<LocalId> = self
            .state
            .read()
            .rows
            .iter()
            .filter(|(_, row)| predicate(row))
            .map(|(id, _)| *id)
            .collect();
        let count = ids.len();
        self.pending
            .lock()
            .extend(ids.into_iter().map(Pending::Remove));
        count
    }

    fn query(&self, predicate: &dyn Fn(&T) -> bool) -> Vec<T> {
        self.state
            .read()
            .rows
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    fn tombstones(&self, since: Timestamp, until: Timestamp) -> Vec<Tombstone> {
        self.state
            .read()
            .tombstones
            .iter()
            .filter(|t| t.deleted_on >= since && t.deleted_on < until)
            .copied()
            .collect()
    }

    fn save(&self) -> CoreResult<usize> {
        let pending: Vec<Pending<T>> = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write();
        let tombstones_len = state.tombstones.len();
        let mut log = Vec::with_capacity(pending.len());
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for op in pending {
            let result = match op {
                Pending::Add(entity) => self.insert(&mut state, entity, &mut log, &mut added),
                Pending::Update(entity) => Self::replace(&mut state, entity, &mut log, &mut added),
                Pending::Remove(id) => self.delete(&mut state, id, &mut log, &mut removed),
            };
            if let Err(err) = result {
                state.undo(log, tombstones_len);
                tracing::debug!(type_name = T::TYPE_NAME, error = %err, "save rolled back");
                return Err(err);
            }
        }

        let count = log.len();
        tracing::debug!(
            type_name = T::TYPE_NAME,
            written = added.len(),
            removed = removed.len(),
            "save committed"
        );
        // Listeners run under the write lock
        self.feed.emit(T::TYPE_NAME, added, removed);
        Ok(count)
    }

    fn subscribe(&self, listener: Arc<dyn CollectionListener>) {
        self.feed.listen(listener);
    }

    fn find_by_sync_id(&self, sync_id: Uuid) -> Option<T> {
        let state = self.state.read();
        state
            .by_sync
            .get(&sync_id)
            .and_then(|id| state.rows.get(id))
            .cloned()
    }

    fn find_by_local_id(&self, local_id: LocalId) -> Option<T> {
        self.state.read().rows.get(&local_id).cloned()
    }

    fn count(&self) -> usize {
        self.state.read().rows.len()
    }
}

impl<T: SyncEntity> MemoryRepository<T> {
    fn insert(
        &self,
        state: &mut State<T>,
        mut entity: T,
        log: &mut Vec<Undo<T>>,
        added: &mut Vec<(Uuid, LocalId)>,
    ) -> CoreResult<()> {
        let sync_id = entity.sync_id();
        if state.by_sync.contains_key(&sync_id) {
            return Err(CoreError::DuplicateSyncId {
                type_name: T::TYPE_NAME.to_string(),
                sync_id,
            });
        }
        let id = match entity.local_id() {
            Some(id) if state.rows.contains_key(&id) => {
                return Err(CoreError::DuplicateLocalId {
                    type_name: T::TYPE_NAME.to_string(),
                    local_id: id.get(),
                });
            }
            Some(id) => id,
            None => state.allocate(self.id_step),
        };
        entity.set_local_id(Some(id));
        state.rows.insert(id, entity);
        state.by_sync.insert(sync_id, id);
        log.push(Undo::Inserted(id, sync_id));
        added.push((sync_id, id));
        Ok(())
    }

    fn replace(
        state: &mut State<T>,
        entity: T,
        log: &mut Vec<Undo<T>>,
        added: &mut Vec<(Uuid, LocalId)>,
    ) -> CoreResult<()> {
        let not_found = || CoreError::EntityNotFound {
            type_name: T::TYPE_NAME.to_string(),
            local_id: entity.local_id().map(|id| id.get()).unwrap_or_default(),
        };
        let id = entity.local_id().ok_or_else(not_found)?;
        if !state.rows.contains_key(&id) {
            return Err(not_found());
        }

        let sync_id = entity.sync_id();
        if let Some(owner) = state.by_sync.get(&sync_id) {
            if *owner != id {
                return Err(CoreError::DuplicateSyncId {
                    type_name: T::TYPE_NAME.to_string(),
                    sync_id,
                });
            }
        }

        if let Some(old) = state.rows.insert(id, entity) {
            state.by_sync.remove(&old.sync_id());
            log.push(Undo::Replaced(old));
        }
        state.by_sync.insert(sync_id, id);
        added.push((sync_id, id));
        Ok(())
    }

    fn delete(
        &self,
        state: &mut State<T>,
        id: LocalId,
        log: &mut Vec<Undo<T>>,
        removed: &mut Vec<(Uuid, LocalId)>,
    ) -> CoreResult<()> {
        // Already removed earlier in the same commit
        let Some(old) = state.rows.remove(&id) else {
            return Ok(());
        };
        let sync_id = old.sync_id();
        state.by_sync.remove(&sync_id);
        state.tombstones.push(Tombstone {
            sync_id,
            deleted_on: self.clock.now(),
        });
        removed.push((sync_id, id));
        log.push(Undo::Removed(old));
        Ok(())
    }
}

impl<T> fmt::Debug for MemoryRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRepository")
            .field("rows", &self.state.read().rows.len())
            .field("pending", &self.pending.lock().len())
            .field("feed", &self.feed)
            .finish()
    }
}

struct Registered {
    erased: Arc<dyn Any + Send + Sync>,
    concrete: Arc<dyn Any + Send + Sync>,
}

/// An in-memory store.
///
/// ```rust,ignore
/// let db = MemoryDatabase::new("client", Arc::new(SystemClock))
///     .with_id_sequence(100, 1)
///     .register::<Address>()
///     .register::<Person>();
/// ```
pub struct MemoryDatabase {
    name: String,
    clock: Arc<dyn Clock>,
    id_cache: Arc<IdCache>,
    id_start: i64,
    id_step: i64,
    repositories: RwLock<BTreeMap<&'static str, Registered>>,
}

impl MemoryDatabase {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            id_cache: Arc::new(IdCache::new()),
            id_start: 1,
            id_step: 1,
            repositories: RwLock::new(BTreeMap::new()),
        }
    }

    /// Sets the local id sequence for repositories registered afterwards.
    pub fn with_id_sequence(mut self, start: i64, step: i64) -> Self {
        self.id_start = start;
        self.id_step = step;
        self
    }

    /// Registers a repository for `T`.
    pub fn register<T: SyncEntity>(self) -> Self {
        let repo = Arc::new(MemoryRepository::<T>::new(
            Arc::clone(&self.clock),
            self.id_start,
            self.id_step,
        ));
        repo.subscribe(self.id_cache.clone());

        let erased: Arc<dyn Repository<T>> = repo.clone();
        self.repositories.write().insert(
            T::TYPE_NAME,
            Registered {
                erased: Arc::new(erased),
                concrete: repo,
            },
        );
        self
    }

    /// Returns the concrete repository for `T`.
    pub fn memory_repository<T: SyncEntity>(&self) -> CoreResult<Arc<MemoryRepository<T>>> {
        let repositories = self.repositories.read();
        let registered = repositories
            .get(T::TYPE_NAME)
            .ok_or_else(|| CoreError::MissingRepository(T::TYPE_NAME.to_string()))?;
        Arc::clone(&registered.concrete)
            .downcast::<MemoryRepository<T>>()
            .map_err(|_| CoreError::RepositoryType(T::TYPE_NAME.to_string()))
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn id_cache(&self) -> Arc<IdCache> {
        Arc::clone(&self.id_cache)
    }

    fn type_names(&self) -> Vec<&'static str> {
        self.repositories.read().keys().copied().collect()
    }

    fn repository_any(&self, type_name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.repositories
            .read()
            .get(type_name)
            .map(|r| Arc::clone(&r.erased))
    }
}

impl fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("name", &self.name)
            .field("types", &self.type_names())
            .field("id_cache", &self.id_cache.len())
            .finish()
    }
}
