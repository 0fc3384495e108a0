//! Per-type sync policy.
//!
//! A [`RepositoryFilter`] decides what a peer exports (`outgoing`), what it
//! accepts (`incoming`) and how an incoming record is matched to an
//! existing one (`lookup`). A [`FilterSet`] holds at most one filter per
//! entity type; a type without a filter syncs unfiltered.

use crate::entity::SyncEntity;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Predicate over one entity.
pub type EntityPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Identity test between a local record and an incoming update.
pub type EntityLookup<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Sync policy for one entity type.
pub struct RepositoryFilter<T> {
    outgoing: Option<EntityPredicate<T>>,
    incoming: Option<EntityPredicate<T>>,
    lookup: Option<EntityLookup<T>>,
    skip_deleted_on_initial_sync: bool,
}

impl<T: SyncEntity> RepositoryFilter<T> {
    /// Creates a filter that lets everything through.
    pub fn new() -> Self {
        Self {
            outgoing: None,
            incoming: None,
            lookup: None,
            skip_deleted_on_initial_sync: false,
        }
    }

    /// Sets the export predicate.
    pub fn with_outgoing(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.outgoing = Some(Arc::new(predicate));
        self
    }

    /// Sets the import predicate.
    pub fn with_incoming(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.incoming = Some(Arc::new(predicate));
        self
    }

    /// Overrides identity matching. Called as `lookup(local, incoming)`.
    pub fn with_lookup(mut self, lookup: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }

    /// Drops soft-deleted records from an initial export.
    pub fn with_skip_deleted_on_initial_sync(mut self, skip: bool) -> Self {
        self.skip_deleted_on_initial_sync = skip;
        self
    }

    /// Returns true if `entity` may be exported.
    pub fn matches_outgoing(&self, entity: &T) -> bool {
        self.outgoing.as_ref().map_or(true, |p| p(entity))
    }

    /// Returns true if `entity` may be imported.
    pub fn matches_incoming(&self, entity: &T) -> bool {
        self.incoming.as_ref().map_or(true, |p| p(entity))
    }

    /// Returns true if `local` is the record `incoming` describes.
    pub fn locate(&self, local: &T, incoming: &T) -> bool {
        match &self.lookup {
            Some(lookup) => lookup(local, incoming),
            None => local.sync_id() == incoming.sync_id(),
        }
    }

    /// Returns true if a custom lookup is configured.
    pub fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    /// Returns true if soft-deleted records are skipped on initial sync.
    pub fn skip_deleted_on_initial_sync(&self) -> bool {
        self.skip_deleted_on_initial_sync
    }
}

impl<T: SyncEntity> Default for RepositoryFilter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RepositoryFilter<T> {
    fn clone(&self) -> Self {
        Self {
            outgoing: self.outgoing.clone(),
            incoming: self.incoming.clone(),
            lookup: self.lookup.clone(),
            skip_deleted_on_initial_sync: self.skip_deleted_on_initial_sync,
        }
    }
}

impl<T> fmt::Debug for RepositoryFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFilter")
            .field("outgoing", &self.outgoing.is_some())
            .field("incoming", &self.incoming.is_some())
            .field("lookup", &self.lookup.is_some())
            .field(
                "skip_deleted_on_initial_sync",
                &self.skip_deleted_on_initial_sync,
            )
            .finish()
    }
}

/// Filters for any number of entity types, keyed by type name.
#[derive(Clone, Default)]
pub struct FilterSet {
    filters: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl FilterSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the filter for `T`.
    pub fn with<T: SyncEntity>(mut self, filter: RepositoryFilter<T>) -> Self {
        self.insert(filter);
        self
    }

    /// Adds (or replaces) the filter for `T`.
    pub fn insert<T: SyncEntity>(&mut self, filter: RepositoryFilter<T>) {
        self.filters.insert(T::TYPE_NAME, Arc::new(filter));
    }

    /// Returns the filter for `T`.
    pub fn get<T: SyncEntity>(&self) -> Option<&RepositoryFilter<T>> {
        self.filters
            .get(T::TYPE_NAME)
            .and_then(|f| f.downcast_ref::<RepositoryFilter<T>>())
    }

    /// Returns true if a filter is registered under `type_name`.
    pub fn contains(&self, type_name: &str) -> bool {
        self.filters.contains_key(type_name)
    }

    /// Returns true if `entity` may be exported.
    pub fn matches_outgoing<T: SyncEntity>(&self, entity: &T) -> bool {
        self.get::<T>().map_or(true, |f| f.matches_outgoing(entity))
    }

    /// Returns true if `entity` may be imported.
    pub fn matches_incoming<T: SyncEntity>(&self, entity: &T) -> bool {
        self.get::<T>().map_or(true, |f| f.matches_incoming(entity))
    }

    /// Returns the custom lookup for `T`, if any.
    pub fn lookup_for<T: SyncEntity>(&self) -> Option<EntityLookup<T>> {
        self.get::<T>().and_then(|f| f.lookup.clone())
    }

    /// Returns true if soft-deleted `T`s are skipped on initial sync.
    pub fn skip_deleted_on_initial_sync<T: SyncEntity>(&self) -> bool {
        self.get::<T>()
            .map_or(false, RepositoryFilter::skip_deleted_on_initial_sync)
    }

    /// Number of filtered types.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns true if no type is filtered.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.filters.keys().collect();
        types.sort();
        f.debug_struct("FilterSet").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::LocalId;
    use crate::time::Timestamp;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct City {
        sync_id: Uuid,
        name: String,
        deleted: bool,
    }

    impl City {
        fn new(name: &str) -> Self {
            Self {
                sync_id: Uuid::new_v4(),
                name: name.into(),
                deleted: false,
            }
        }
    }

    impl SyncEntity for City {
        const TYPE_NAME: &'static str = "City";

        fn sync_id(&self) -> Uuid {
            self.sync_id
        }
        fn set_sync_id(&mut self, sync_id: Uuid) {
            self.sync_id = sync_id;
        }
        fn local_id(&self) -> Option<LocalId> {
            None
        }
        fn set_local_id(&mut self, _local_id: Option<LocalId>) {}
        fn created_on(&self) -> Timestamp {
            Timestamp::from_micros(0)
        }
        fn modified_on(&self) -> Timestamp {
            Timestamp::from_micros(0)
        }
        fn set_modified_on(&mut self, _modified_on: Timestamp) {}
        fn is_deleted(&self) -> bool {
            self.deleted
        }
        fn merge(&mut self, _update: &Self, _exclusions: &[&str]) -> bool {
            false
        }
    }

    #[test]
    fn empty_filter_passes_everything() {
        let filter = RepositoryFilter::<City>::new();
        let city = City::new("Dar");
        assert!(filter.matches_outgoing(&city));
        assert!(filter.matches_incoming(&city));
        assert!(filter.locate(&city, &city));
        assert!(!filter.locate(&city, &City::new("Dar")));
    }

    #[test]
    fn predicates_and_lookup() {
        let filter = RepositoryFilter::<City>::new()
            .with_outgoing(|c| c.name != "Secret")
            .with_incoming(|c| !c.deleted)
            .with_lookup(|local, incoming| local.name == incoming.name);

        assert!(!filter.matches_outgoing(&City::new("Secret")));
        let mut deleted = City::new("Arusha");
        deleted.deleted = true;
        assert!(!filter.matches_incoming(&deleted));
        assert!(filter.locate(&City::new("Dodoma"), &City::new("Dodoma")));
        assert!(filter.has_lookup());
    }

    #[test]
    fn filter_set_dispatches_by_type() {
        let set = FilterSet::new().with(
            RepositoryFilter::<City>::new()
                .with_outgoing(|c| c.name.starts_with('M'))
                .with_skip_deleted_on_initial_sync(true),
        );

        assert!(set.contains("City"));
        assert!(set.matches_outgoing(&City::new("Moshi")));
        assert!(!set.matches_outgoing(&City::new("Tanga")));
        assert!(set.matches_incoming(&City::new("Tanga")));
        assert!(set.skip_deleted_on_initial_sync::<City>());
        assert!(set.lookup_for::<City>().is_none());
        assert_eq!(format!("{set:?}"), "FilterSet { types: [\"City\"] }");
    }

    #[test]
    fn missing_filter_means_unfiltered() {
        let set = FilterSet::new();
        assert!(set.is_empty());
        assert!(set.matches_outgoing(&City::new("Any")));
        assert!(!set.skip_deleted_on_initial_sync::<City>());
    }
}
