//! Type registry and per-type change handling.
//!
//! A [`SyncSchema`] maps each entity type name to a handler that knows how
//! to export, apply and correct records of that type. It is built once,
//! when the peer is created, and orders the types so that referenced types
//! come before the types that reference them.

use crate::error::{SyncError, SyncResult};
use pairsync_core::{
    Clock, Database, DatabaseExt, EntityLookup, FilterSet, IdCache, LocalId, Repository,
    SyncEntity, SyncIssue, SyncObject, SyncObjectStatus, SyncOptions, Timestamp, SYNC_ID_FIELD,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Objects of the batch not applied yet, by `(type_name, sync_id)`.
pub(crate) type BatchIndex<'a> = HashSet<(&'a str, Uuid)>;

/// Result of applying one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// The store changed.
    Changed,
    /// Nothing to do, or rejected by a filter.
    Unchanged,
    /// A required parent is later in the batch.
    Waiting,
}

/// An optional foreign key left empty during apply because its target was
/// later in the same batch.
#[derive(Debug, Clone)]
pub(crate) struct Deferred {
    pub type_name: &'static str,
    pub object_id: Uuid,
    pub local_id: LocalId,
    pub field: &'static str,
    pub target: &'static str,
    pub target_sync_id: Uuid,
}

/// Peer filters and session filters, both of which must pass.
#[derive(Clone, Copy)]
pub(crate) struct Filters<'a> {
    peer: &'a FilterSet,
    session: &'a FilterSet,
}

impl<'a> Filters<'a> {
    pub fn new(peer: &'a FilterSet, session: &'a FilterSet) -> Self {
        Self { peer, session }
    }

    pub fn outgoing<T: SyncEntity>(&self, entity: &T) -> bool {
        self.peer.matches_outgoing(entity) && self.session.matches_outgoing(entity)
    }

    pub fn incoming<T: SyncEntity>(&self, entity: &T) -> bool {
        self.peer.matches_incoming(entity) && self.session.matches_incoming(entity)
    }

    pub fn lookup<T: SyncEntity>(&self) -> Option<EntityLookup<T>> {
        self.session
            .lookup_for::<T>()
            .or_else(|| self.peer.lookup_for::<T>())
    }

    pub fn skip_deleted_on_initial_sync<T: SyncEntity>(&self) -> bool {
        self.peer.skip_deleted_on_initial_sync::<T>()
            || self.session.skip_deleted_on_initial_sync::<T>()
    }
}

/// Everything a handler needs for one peer call.
pub(crate) struct PeerContext<'a> {
    pub db: &'a dyn Database,
    pub schema: &'a SyncSchema,
    pub cache: Arc<IdCache>,
    pub clock: Arc<dyn Clock>,
    pub filters: Filters<'a>,
    pub options: &'a SyncOptions,
}

impl<'a> PeerContext<'a> {
    pub fn new(
        db: &'a dyn Database,
        schema: &'a SyncSchema,
        filters: Filters<'a>,
        options: &'a SyncOptions,
    ) -> Self {
        Self {
            db,
            schema,
            cache: db.id_cache(),
            clock: db.clock(),
            filters,
            options,
        }
    }

    /// Translates a global id to this store's local id and canonical
    /// sync id.
    pub fn resolve(&self, type_name: &str, sync_id: Uuid) -> Option<(LocalId, Uuid)> {
        self.schema.handler(type_name)?.resolve(self, sync_id)
    }
}

/// Type-erased operations for one entity type.
pub(crate) trait EntityHandler: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn depends_on(&self) -> &'static [&'static str];

    /// Records every row of the type in the ID cache.
    fn warm_cache(&self, db: &dyn Database) -> SyncResult<usize>;

    /// Appends the changes in `[since, until)` to `out`.
    fn export(
        &self,
        ctx: &PeerContext<'_>,
        since: Timestamp,
        until: Timestamp,
        out: &mut Vec<SyncObject>,
    ) -> SyncResult<()>;

    /// Returns the sync id of a row if it, and every required parent, may
    /// be exported.
    fn visible_sync_id(
        &self,
        ctx: &PeerContext<'_>,
        local_id: LocalId,
        visited: &mut HashSet<(&'static str, LocalId)>,
    ) -> Option<Uuid>;

    fn resolve(&self, ctx: &PeerContext<'_>, sync_id: Uuid) -> Option<(LocalId, Uuid)>;

    /// Applies one object. `pending` holds the batch objects not applied
    /// yet.
    fn apply(
        &self,
        ctx: &PeerContext<'_>,
        object: &SyncObject,
        pending: &BatchIndex<'_>,
        deferred: &mut Vec<Deferred>,
    ) -> Result<Applied, SyncIssue>;

    /// Number of rows, other than `local_id` itself, whose foreign keys
    /// point at the `target` row with `local_id`.
    fn references_to(&self, ctx: &PeerContext<'_>, target: &str, local_id: LocalId) -> usize;

    /// Fills in a foreign key deferred during apply.
    fn patch(&self, ctx: &PeerContext<'_>, deferred: &Deferred) -> Result<bool, SyncIssue>;

    /// Appends the row with `sync_id` and its parents to `out`.
    fn collect_by_sync_id(
        &self,
        ctx: &PeerContext<'_>,
        sync_id: Uuid,
        out: &mut Vec<SyncObject>,
        seen: &mut HashSet<(&'static str, Uuid)>,
    ) -> SyncResult<()>;

    /// Appends the row with `local_id` and its parents to `out`.
    fn collect_by_local_id(
        &self,
        ctx: &PeerContext<'_>,
        local_id: LocalId,
        out: &mut Vec<SyncObject>,
        seen: &mut HashSet<(&'static str, Uuid)>,
    ) -> SyncResult<()>;
}

struct TypedHandler<T>(PhantomData<fn() -> T>);

impl<T: SyncEntity> TypedHandler<T> {
    fn repository(db: &dyn Database) -> SyncResult<Arc<dyn Repository<T>>> {
        Ok(db.repository::<T>()?)
    }

    fn unknown(object: &SyncObject, message: impl fmt::Display) -> SyncIssue {
        SyncIssue::unknown(object.sync_id(), T::TYPE_NAME, message.to_string())
    }

    /// Finds the local record an incoming update describes.
    fn locate(ctx: &PeerContext<'_>, repo: &dyn Repository<T>, incoming: &T) -> Option<T> {
        let sync_id = incoming.sync_id();
        if let Some(local_id) = ctx.cache.get_local_id(T::TYPE_NAME, sync_id) {
            if let Some(row) = repo.find_by_local_id(local_id) {
                return Some(row);
            }
        }
        if let Some(row) = repo.find_by_sync_id(sync_id) {
            return Some(row);
        }
        let lookup = ctx.filters.lookup::<T>()?;
        repo.query(&|local: &T| lookup(local, incoming))
            .into_iter()
            .next()
    }

    /// Rewrites the foreign keys of a store row to exported form.
    ///
    /// Returns false if a required parent may not be exported.
    fn fill_relationships(ctx: &PeerContext<'_>, row: &mut T) -> bool {
        let mut visited = HashSet::new();
        if let Some(local_id) = row.local_id() {
            visited.insert((T::TYPE_NAME, local_id));
        }

        for rel in row.relationships() {
            // Unresolved links from an earlier apply travel as they are
            let Some(parent) = rel.local_id else {
                continue;
            };
            let visible = ctx
                .schema
                .handler(rel.target)
                .and_then(|h| h.visible_sync_id(ctx, parent, &mut visited));
            match visible {
                Some(sync_id) => row.set_relationship(rel.field, Some(parent), Some(sync_id)),
                None if rel.required => return false,
                None => row.set_relationship(rel.field, None, None),
            }
        }
        true
    }

    /// Resolves foreign keys left empty by an earlier deferred apply.
    fn repair(ctx: &PeerContext<'_>, row: &mut T) -> bool {
        let mut repaired = false;
        for rel in row.relationships() {
            if rel.local_id.is_some() {
                continue;
            }
            if let Some(sync_id) = rel.sync_id {
                if let Some((local, canonical)) = ctx.resolve(rel.target, sync_id) {
                    row.set_relationship(rel.field, Some(local), Some(canonical));
                    repaired = true;
                }
            }
        }
        repaired
    }

    fn apply_tombstone(ctx: &PeerContext<'_>, object: &SyncObject) -> Result<Applied, SyncIssue> {
        let tombstone = object.to_tombstone().map_err(|e| Self::unknown(object, e))?;
        let repo = Self::repository(ctx.db).map_err(|e| Self::unknown(object, e))?;

        let local = ctx
            .cache
            .get_local_id(T::TYPE_NAME, tombstone.sync_id)
            .and_then(|id| repo.find_by_local_id(id))
            .or_else(|| repo.find_by_sync_id(tombstone.sync_id));
        let Some(local) = local else {
            return Ok(Applied::Unchanged);
        };
        if !ctx.filters.incoming(&local) {
            return Ok(Applied::Unchanged);
        }
        if T::IMMUTABLE {
            return Err(SyncIssue::update_exception(
                object.sync_id(),
                T::TYPE_NAME,
                format!("{} records cannot be removed", T::TYPE_NAME),
            ));
        }
        let local_id = local
            .local_id()
            .ok_or_else(|| Self::unknown(object, "stored record has no local id"))?;

        let referencing: usize = ctx
            .schema
            .handlers()
            .map(|h| h.references_to(ctx, T::TYPE_NAME, local_id))
            .sum();
        if referencing > 0 {
            return Err(SyncIssue::relationship(
                object.sync_id(),
                T::TYPE_NAME,
                format!(
                    "{} {} is still referenced by {} records",
                    T::TYPE_NAME,
                    tombstone.sync_id,
                    referencing
                ),
            ));
        }

        repo.remove(&|row: &T| row.local_id() == Some(local_id));
        repo.save().map_err(|e| Self::unknown(object, e))?;
        ctx.cache.remove(T::TYPE_NAME, tombstone.sync_id);
        tracing::debug!(
            type_name = T::TYPE_NAME,
            sync_id = %tombstone.sync_id,
            "applied permanent delete"
        );
        Ok(Applied::Changed)
    }

    fn collect_row(
        ctx: &PeerContext<'_>,
        mut row: T,
        out: &mut Vec<SyncObject>,
        seen: &mut HashSet<(&'static str, Uuid)>,
    ) -> SyncResult<()> {
        if !seen.insert((T::TYPE_NAME, row.sync_id())) {
            return Ok(());
        }
        if !ctx.filters.outgoing(&row) {
            return Ok(());
        }

        // Parents first
        for rel in row.relationships() {
            if let (Some(parent), Some(handler)) = (rel.local_id, ctx.schema.handler(rel.target)) {
                handler.collect_by_local_id(ctx, parent, out, seen)?;
            }
        }

        if !Self::fill_relationships(ctx, &mut row) {
            return Ok(());
        }
        let status = if row.is_deleted() {
            SyncObjectStatus::Deleted
        } else {
            SyncObjectStatus::Modified
        };
        out.push(SyncObject::from_entity(&row, status)?);
        Ok(())
    }
}

impl<T: SyncEntity> EntityHandler for TypedHandler<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        T::DEPENDS_ON
    }

    fn warm_cache(&self, db: &dyn Database) -> SyncResult<usize> {
        let cache = db.id_cache();
        let rows = Self::repository(db)?.query(&|_: &T| true);
        for row in &rows {
            if let Some(local_id) = row.local_id() {
                cache.set(T::TYPE_NAME, row.sync_id(), local_id);
            }
        }
        Ok(rows.len())
    }

    fn export(
        &self,
        ctx: &PeerContext<'_>,
        since: Timestamp,
        until: Timestamp,
        out: &mut Vec<SyncObject>,
    ) -> SyncResult<()> {
        let repo = Self::repository(ctx.db)?;
        let skip_deleted = since.is_min() && ctx.filters.skip_deleted_on_initial_sync::<T>();

        let mut rows = repo.query(&|row: &T| row.modified_on() >= since && row.modified_on() < until);
        rows.sort_by_key(|row| (row.modified_on(), row.sync_id()));

        let before = out.len();
        for mut row in rows {
            if skip_deleted && row.is_deleted() {
                continue;
            }
            if !ctx.filters.outgoing(&row) {
                continue;
            }
            if let Some(local_id) = row.local_id() {
                ctx.cache.set(T::TYPE_NAME, row.sync_id(), local_id);
            }
            if !Self::fill_relationships(ctx, &mut row) {
                tracing::debug!(
                    type_name = T::TYPE_NAME,
                    sync_id = %row.sync_id(),
                    "excluded: required parent is filtered"
                );
                continue;
            }

            let status = if row.is_deleted() {
                SyncObjectStatus::Deleted
            } else if row.created_on() >= since {
                SyncObjectStatus::Added
            } else {
                SyncObjectStatus::Modified
            };
            out.push(SyncObject::from_entity(&row, status)?);
        }

        for tombstone in repo.tombstones(since, until) {
            // Re-created after the delete
            if repo.find_by_sync_id(tombstone.sync_id).is_some() {
                continue;
            }
            out.push(SyncObject::tombstone(T::TYPE_NAME, &tombstone)?);
        }

        tracing::debug!(
            type_name = T::TYPE_NAME,
            exported = out.len() - before,
            "exported window"
        );
        Ok(())
    }

    fn visible_sync_id(
        &self,
        ctx: &PeerContext<'_>,
        local_id: LocalId,
        visited: &mut HashSet<(&'static str, LocalId)>,
    ) -> Option<Uuid> {
        let row = Self::repository(ctx.db).ok()?.find_by_local_id(local_id)?;
        ctx.cache.set(T::TYPE_NAME, row.sync_id(), local_id);

        // Already on the path being checked
        if !visited.insert((T::TYPE_NAME, local_id)) {
            return Some(row.sync_id());
        }
        if !ctx.filters.outgoing(&row) {
            return None;
        }
        for rel in row.relationships().iter().filter(|r| r.required) {
            if let Some(parent) = rel.local_id {
                ctx.schema
                    .handler(rel.target)?
                    .visible_sync_id(ctx, parent, visited)?;
            }
        }
        Some(row.sync_id())
    }

    fn resolve(&self, ctx: &PeerContext<'_>, sync_id: Uuid) -> Option<(LocalId, Uuid)> {
        if let Some(local_id) = ctx.cache.get_local_id(T::TYPE_NAME, sync_id) {
            let canonical = ctx
                .cache
                .get_sync_id(T::TYPE_NAME, local_id)
                .unwrap_or(sync_id);
            return Some((local_id, canonical));
        }
        let row = Self::repository(ctx.db).ok()?.find_by_sync_id(sync_id)?;
        let local_id = row.local_id()?;
        ctx.cache.set(T::TYPE_NAME, row.sync_id(), local_id);
        Some((local_id, row.sync_id()))
    }

    fn apply(
        &self,
        ctx: &PeerContext<'_>,
        object: &SyncObject,
        pending: &BatchIndex<'_>,
        deferred: &mut Vec<Deferred>,
    ) -> Result<Applied, SyncIssue> {
        if object.is_tombstone() {
            return Self::apply_tombstone(ctx, object);
        }

        let mut incoming: T = object.to_entity().map_err(|e| Self::unknown(object, e))?;
        if incoming.sync_id() != object.sync_id() {
            return Err(Self::unknown(object, "payload sync id does not match object"));
        }
        if !ctx.filters.incoming(&incoming) {
            tracing::debug!(
                type_name = T::TYPE_NAME,
                sync_id = %object.sync_id(),
                "rejected by incoming filter"
            );
            return Ok(Applied::Unchanged);
        }
        let repo = Self::repository(ctx.db).map_err(|e| Self::unknown(object, e))?;

        // Translate foreign keys to this store's ids
        let mut forward = Vec::new();
        for rel in incoming.relationships() {
            let Some(target_id) = rel.sync_id else {
                incoming.set_relationship(rel.field, None, None);
                continue;
            };
            match ctx.resolve(rel.target, target_id) {
                Some((local, canonical)) => {
                    incoming.set_relationship(rel.field, Some(local), Some(canonical));
                }
                None if pending.contains(&(rel.target, target_id)) => {
                    if rel.required {
                        return Ok(Applied::Waiting);
                    }
                    incoming.set_relationship(rel.field, None, Some(target_id));
                    forward.push((rel.field, rel.target, target_id));
                }
                None => {
                    return Err(SyncIssue::relationship(
                        object.sync_id(),
                        T::TYPE_NAME,
                        format!(
                            "{} references {} {} which does not exist",
                            rel.field, rel.target, target_id
                        ),
                    ));
                }
            }
        }

        let (local_id, changed) = match Self::locate(ctx, repo.as_ref(), &incoming) {
            None => {
                let sync_id = incoming.sync_id();
                incoming.set_local_id(None);
                if !ctx.options.maintain_modified_on {
                    incoming.set_modified_on(ctx.clock.now());
                }
                repo.add(incoming);
                repo.save().map_err(|e| Self::unknown(object, e))?;

                let local_id = ctx
                    .cache
                    .get_local_id(T::TYPE_NAME, sync_id)
                    .or_else(|| repo.find_by_sync_id(sync_id).and_then(|r| r.local_id()))
                    .ok_or_else(|| Self::unknown(object, "inserted record not found"))?;
                (local_id, true)
            }
            Some(mut local) => {
                let local_id = local
                    .local_id()
                    .ok_or_else(|| Self::unknown(object, "stored record has no local id"))?;
                if local.sync_id() != incoming.sync_id() {
                    // Matched by custom lookup: keep our id, remember theirs
                    ctx.cache
                        .set_alias(T::TYPE_NAME, incoming.sync_id(), local_id);
                }

                if T::IMMUTABLE {
                    let mut candidate = local.clone();
                    if candidate.merge(&incoming, &[SYNC_ID_FIELD]) {
                        return Err(SyncIssue::update_exception(
                            object.sync_id(),
                            T::TYPE_NAME,
                            format!("{} records cannot be modified", T::TYPE_NAME),
                        ));
                    }
                    return Ok(Applied::Unchanged);
                }

                let mut changed = Self::repair(ctx, &mut local);
                changed |= local.merge(&incoming, &[SYNC_ID_FIELD]);
                if changed {
                    let modified_on = if ctx.options.maintain_modified_on {
                        local.modified_on().max(incoming.modified_on())
                    } else {
                        ctx.clock.now()
                    };
                    local.set_modified_on(modified_on);
                    repo.update(local);
                    repo.save().map_err(|e| Self::unknown(object, e))?;
                }
                (local_id, changed)
            }
        };

        deferred.extend(
            forward
                .into_iter()
                .map(|(field, target, target_sync_id)| Deferred {
                    type_name: T::TYPE_NAME,
                    object_id: object.sync_id(),
                    local_id,
                    field,
                    target,
                    target_sync_id,
                }),
        );
        Ok(if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        })
    }

    fn references_to(&self, ctx: &PeerContext<'_>, target: &str, local_id: LocalId) -> usize {
        let Ok(repo) = Self::repository(ctx.db) else {
            return 0;
        };
        repo.query(&|row: &T| {
            if T::TYPE_NAME == target && row.local_id() == Some(local_id) {
                return false;
            }
            row.relationships()
                .iter()
                .any(|rel| rel.target == target && rel.local_id == Some(local_id))
        })
        .len()
    }

    fn patch(&self, ctx: &PeerContext<'_>, deferred: &Deferred) -> Result<bool, SyncIssue> {
        let repo = Self::repository(ctx.db).map_err(|e| {
            SyncIssue::unknown(deferred.object_id, T::TYPE_NAME, e.to_string())
        })?;
        let Some(mut row) = repo.find_by_local_id(deferred.local_id) else {
            return Ok(false);
        };
        let Some(rel) = row
            .relationships()
            .into_iter()
            .find(|r| r.field == deferred.field)
        else {
            return Ok(false);
        };
        // A newer local value won the merge
        if rel.local_id.is_some() || rel.sync_id != Some(deferred.target_sync_id) {
            return Ok(false);
        }

        let resolved = ctx.resolve(deferred.target, deferred.target_sync_id);
        match resolved {
            Some((local, canonical)) => {
                row.set_relationship(deferred.field, Some(local), Some(canonical))
            }
            // Target was rejected: unlink
            None => row.set_relationship(deferred.field, None, None),
        }
        repo.update(row);
        repo.save().map_err(|e| {
            SyncIssue::unknown(deferred.object_id, T::TYPE_NAME, e.to_string())
        })?;
        if resolved.is_none() {
            return Err(SyncIssue::relationship(
                deferred.object_id,
                T::TYPE_NAME,
                format!(
                    "{} references {} {} which was not applied",
                    deferred.field, deferred.target, deferred.target_sync_id
                ),
            ));
        }
        Ok(true)
    }

    fn collect_by_sync_id(
        &self,
        ctx: &PeerContext<'_>,
        sync_id: Uuid,
        out: &mut Vec<SyncObject>,
        seen: &mut HashSet<(&'static str, Uuid)>,
    ) -> SyncResult<()> {
        let repo = Self::repository(ctx.db)?;
        let row = self
            .resolve(ctx, sync_id)
            .and_then(|(local_id, _)| repo.find_by_local_id(local_id))
            .or_else(|| repo.find_by_sync_id(sync_id));
        match row {
            Some(row) => Self::collect_row(ctx, row, out, seen),
            None => Ok(()),
        }
    }

    fn collect_by_local_id(
        &self,
        ctx: &PeerContext<'_>,
        local_id: LocalId,
        out: &mut Vec<SyncObject>,
        seen: &mut HashSet<(&'static str, Uuid)>,
    ) -> SyncResult<()> {
        match Self::repository(ctx.db)?.find_by_local_id(local_id) {
            Some(row) => Self::collect_row(ctx, row, out, seen),
            None => Ok(()),
        }
    }
}

/// The registered entity types of a peer, in dependency order.
pub struct SyncSchema {
    handlers: Vec<Arc<dyn EntityHandler>>,
    index: HashMap<&'static str, usize>,
}

impl SyncSchema {
    /// Starts building a schema.
    pub fn builder() -> SyncSchemaBuilder {
        SyncSchemaBuilder::default()
    }

    /// Type names in dependency order.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.type_name()).collect()
    }

    /// Position of a type in dependency order.
    pub fn order_of(&self, type_name: &str) -> Option<usize> {
        self.index.get(type_name).copied()
    }

    /// Returns true if the type is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.index.contains_key(type_name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn handler(&self, type_name: &str) -> Option<&dyn EntityHandler> {
        self.index
            .get(type_name)
            .map(|&i| self.handlers[i].as_ref())
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = &dyn EntityHandler> {
        self.handlers.iter().map(|h| h.as_ref())
    }
}

impl fmt::Debug for SyncSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSchema")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Builder for [`SyncSchema`].
#[derive(Default)]
pub struct SyncSchemaBuilder {
    handlers: Vec<Arc<dyn EntityHandler>>,
}

impl SyncSchemaBuilder {
    /// Registers an entity type. Registering a type twice is a no-op.
    pub fn register<T: SyncEntity>(mut self) -> Self {
        if !self.handlers.iter().any(|h| h.type_name() == T::TYPE_NAME) {
            self.handlers.push(Arc::new(TypedHandler::<T>(PhantomData)));
        }
        self
    }

    /// Orders the types so every type follows the types it depends on.
    ///
    /// Self references are allowed. Fails on a dependency that is not
    /// registered or on a dependency cycle between types.
    pub fn build(self) -> SyncResult<SyncSchema> {
        let names: HashSet<&'static str> = self.handlers.iter().map(|h| h.type_name()).collect();
        for handler in &self.handlers {
            if let Some(missing) = handler
                .depends_on()
                .iter()
                .find(|d| !names.contains(*d))
            {
                return Err(SyncError::Schema(format!(
                    "{} depends on unregistered type {}",
                    handler.type_name(),
                    missing
                )));
            }
        }

        // Kahn's algorithm, stable in registration order
        let mut remaining = self.handlers;
        let mut ordered: Vec<Arc<dyn EntityHandler>> = Vec::with_capacity(remaining.len());
        let mut placed: HashSet<&'static str> = HashSet::new();
        while !remaining.is_empty() {
            let ready = remaining.iter().position(|h| {
                h.depends_on()
                    .iter()
                    .all(|d| *d == h.type_name() || placed.contains(d))
            });
            let Some(position) = ready else {
                let stuck: Vec<_> = remaining.iter().map(|h| h.type_name()).collect();
                return Err(SyncError::Schema(format!(
                    "dependency cycle between {}",
                    stuck.join(", ")
                )));
            };
            let handler = remaining.remove(position);
            placed.insert(handler.type_name());
            ordered.push(handler);
        }

        let index = ordered
            .iter()
            .enumerate()
            .map(|(i, h)| (h.type_name(), i))
            .collect();
        Ok(SyncSchema {
            handlers: ordered,
            index,
        })
    }
}

impl fmt::Debug for SyncSchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<_> = self.handlers.iter().map(|h| h.type_name()).collect();
        f.debug_struct("SyncSchemaBuilder")
            .field("types", &types)
            .finish()
    }
}
