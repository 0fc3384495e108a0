//! Store contracts consumed by the sync peer.

use crate::change_feed::CollectionListener;
use crate::entity::{LocalId, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::id_cache::IdCache;
use crate::object::Tombstone;
use crate::time::{Clock, Timestamp};
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

/// Typed access to the records of one entity type.
///
/// Writes are staged by `add`, `update` and `remove` and become visible on
/// `save`. A commit notifies subscribed listeners while the repository's
/// write lock is held.
pub trait Repository<T: SyncEntity>: Send + Sync {
    /// Stages an insert. A missing local id is assigned on save.
    fn add(&self, entity: T);

    /// Stages a replacement of the row with the entity's local id.
    fn update(&self, entity: T);

    /// Stages permanent removal of every committed row matching
    /// `predicate`. Returns how many rows were staged.
    fn remove(&self, predicate: &dyn Fn(&T) -> bool) -> usize;

    /// Returns the committed rows matching `predicate`, in local id order.
    fn query(&self, predicate: &dyn Fn(&T) -> bool) -> Vec<T>;

    /// Permanent deletes recorded in `[since, until)`.
    fn tombstones(&self, since: Timestamp, until: Timestamp) -> Vec<Tombstone>;

    /// Commits staged writes. Returns the number of rows written.
    fn save(&self) -> CoreResult<usize>;

    /// Registers a commit listener.
    fn subscribe(&self, listener: Arc<dyn CollectionListener>);

    /// Finds a committed row by global id.
    fn find_by_sync_id(&self, sync_id: Uuid) -> Option<T> {
        self.query(&|e: &T| e.sync_id() == sync_id).into_iter().next()
    }

    /// Finds a committed row by local id.
    fn find_by_local_id(&self, local_id: LocalId) -> Option<T> {
        self.query(&|e: &T| e.local_id() == Some(local_id))
            .into_iter()
            .next()
    }

    /// Number of committed rows.
    fn count(&self) -> usize {
        self.query(&|_: &T| true).len()
    }
}

/// A store: a set of repositories keyed by type name, a clock and an ID
/// cache.
///
/// The trait is object safe. Typed access goes through
/// [`DatabaseExt::repository`].
pub trait Database: Send + Sync {
    /// Store name, used in logs.
    fn name(&self) -> &str;

    /// The store's clock.
    fn clock(&self) -> Arc<dyn Clock>;

    /// The store's ID cache.
    fn id_cache(&self) -> Arc<IdCache>;

    /// Type names of the registered repositories.
    fn type_names(&self) -> Vec<&'static str>;

    /// Returns the repository for `type_name` as an `Arc<dyn Repository<T>>`
    /// erased behind `Any`.
    fn repository_any(&self, type_name: &str) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Typed helpers over [`Database`].
pub trait DatabaseExt: Database {
    /// Returns the repository for `T`.
    fn repository<T: SyncEntity>(&self) -> CoreResult<Arc<dyn Repository<T>>> {
        let any = self
            .repository_any(T::TYPE_NAME)
            .ok_or_else(|| CoreError::MissingRepository(T::TYPE_NAME.to_string()))?;
        any.downcast_ref::<Arc<dyn Repository<T>>>()
            .cloned()
            .ok_or_else(|| CoreError::RepositoryType(T::TYPE_NAME.to_string()))
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}
