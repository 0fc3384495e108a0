//! Test peers and engine helpers.
//!
//! A [`TestPeer`] is an in-memory store with a manual clock, registered for
//! the sample types and wrapped in a [`StoreSyncClient`].

use crate::fixtures::{Address, LogEvent, Person};
use pairsync_core::{
    Clock, FilterSet, ManualClock, MemoryDatabase, MemoryRepository, Repository, SyncEntity,
    Timestamp,
};
use pairsync_engine::{
    PeerConfig, StoreSyncClient, SyncConfig, SyncEngine, SyncSchema,
};
use std::sync::Arc;
use uuid::Uuid;

/// Start of every test clock.
pub const CLOCK_START: Timestamp = Timestamp::from_micros(1_000_000);

/// Clock step of every test clock.
pub const CLOCK_STEP: i64 = 10;

/// Schema with the sample types.
pub fn sample_schema() -> Arc<SyncSchema> {
    Arc::new(
        SyncSchema::builder()
            .register::<Address>()
            .register::<Person>()
            .register::<LogEvent>()
            .build()
            .expect("sample schema is acyclic"),
    )
}

/// Store registered for the sample types.
pub fn sample_database(
    name: &str,
    clock: Arc<dyn Clock>,
    id_start: i64,
    id_step: i64,
) -> MemoryDatabase {
    MemoryDatabase::new(name, clock)
        .with_id_sequence(id_start, id_step)
        .register::<Address>()
        .register::<Person>()
        .register::<LogEvent>()
}

/// Builder for [`TestPeer`].
#[derive(Debug)]
pub struct TestPeerBuilder {
    name: String,
    id_start: i64,
    id_step: i64,
    filters: FilterSet,
    page_size: usize,
}

impl TestPeerBuilder {
    /// Sets the local id sequence.
    pub fn id_sequence(mut self, start: i64, step: i64) -> Self {
        self.id_start = start;
        self.id_step = step;
        self
    }

    /// Sets the filters the peer always applies.
    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the export page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builds the peer.
    pub fn build(self) -> TestPeer {
        let clock = Arc::new(ManualClock::with_step(CLOCK_START, CLOCK_STEP));
        let db = Arc::new(sample_database(
            &self.name,
            clock.clone(),
            self.id_start,
            self.id_step,
        ));
        let config = PeerConfig::new(&self.name).with_page_size(self.page_size);
        let peer = Arc::new(
            StoreSyncClient::new(Arc::clone(&db), sample_schema(), config)
                .with_filters(self.filters),
        );
        TestPeer {
            name: self.name,
            clock,
            db,
            peer,
        }
    }
}

/// An in-memory peer for tests.
#[derive(Debug)]
pub struct TestPeer {
    /// Peer name.
    pub name: String,
    /// The store's clock.
    pub clock: Arc<ManualClock>,
    /// The store.
    pub db: Arc<MemoryDatabase>,
    /// The peer serving the store.
    pub peer: Arc<StoreSyncClient<MemoryDatabase>>,
}

impl TestPeer {
    /// Creates a peer with default settings.
    pub fn new(name: &str) -> Self {
        Self::builder(name).build()
    }

    /// Starts building a peer.
    pub fn builder(name: &str) -> TestPeerBuilder {
        TestPeerBuilder {
            name: name.to_string(),
            id_start: 1,
            id_step: 1,
            filters: FilterSet::new(),
            page_size: 500,
        }
    }

    /// Reads the clock, advancing it.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The repository for `T`.
    pub fn repo<T: SyncEntity>(&self) -> Arc<MemoryRepository<T>> {
        self.db
            .memory_repository::<T>()
            .expect("sample type is registered")
    }

    /// Adds a record and returns it as stored.
    pub fn insert<T: SyncEntity>(&self, entity: T) -> T {
        let sync_id = entity.sync_id();
        let repo = self.repo::<T>();
        repo.add(entity);
        repo.save().expect("insert commits");
        repo.find_by_sync_id(sync_id).expect("inserted record exists")
    }

    /// Replaces a stored record.
    pub fn update<T: SyncEntity>(&self, entity: T) {
        let repo = self.repo::<T>();
        repo.update(entity);
        repo.save().expect("update commits");
    }

    /// Permanently removes a record.
    pub fn remove<T: SyncEntity>(&self, sync_id: Uuid) -> usize {
        let repo = self.repo::<T>();
        let removed = repo.remove(&|row: &T| row.sync_id() == sync_id);
        repo.save().expect("remove commits");
        removed
    }

    /// Finds a record by sync id.
    pub fn find<T: SyncEntity>(&self, sync_id: Uuid) -> Option<T> {
        self.repo::<T>().find_by_sync_id(sync_id)
    }

    /// All records of `T`, ordered by local id.
    pub fn all<T: SyncEntity>(&self) -> Vec<T> {
        self.repo::<T>().rows()
    }

    /// Number of records of `T`.
    pub fn count<T: SyncEntity>(&self) -> usize {
        self.repo::<T>().count()
    }
}

/// An engine between two in-memory peers.
pub type TestEngine =
    SyncEngine<Arc<StoreSyncClient<MemoryDatabase>>, Arc<StoreSyncClient<MemoryDatabase>>>;

/// Creates an engine syncing `client` with `server`.
pub fn engine(client: &TestPeer, server: &TestPeer) -> TestEngine {
    engine_with_config(client, server, SyncConfig::default())
}

/// Creates an engine with a custom configuration.
pub fn engine_with_config(client: &TestPeer, server: &TestPeer, config: SyncConfig) -> TestEngine {
    SyncEngine::new(config, Arc::clone(&client.peer), Arc::clone(&server.peer))
}

/// Projection of a record that ignores store-local ids and timestamps,
/// for comparing the content of two stores.
pub trait Content {
    /// Comparable content.
    type Key: Ord + std::fmt::Debug;

    /// Returns the comparable content.
    fn content(&self) -> Self::Key;
}

impl Content for Address {
    type Key = (Uuid, String, String, Option<Uuid>, bool);

    fn content(&self) -> Self::Key {
        (
            self.sync_id,
            self.line1.clone(),
            self.city.clone(),
            self.linked_address_sync_id,
            self.deleted,
        )
    }
}

impl Content for Person {
    type Key = (Uuid, String, Option<Uuid>, bool);

    fn content(&self) -> Self::Key {
        (self.sync_id, self.name.clone(), self.address_sync_id, self.deleted)
    }
}

impl Content for LogEvent {
    type Key = (Uuid, String, String);

    fn content(&self) -> Self::Key {
        (self.sync_id, self.level.clone(), self.message.clone())
    }
}

/// Sorted content of every record of `T` in `peer`.
pub fn contents<T: SyncEntity + Content>(peer: &TestPeer) -> Vec<T::Key> {
    let mut keys: Vec<_> = peer.all::<T>().iter().map(Content::content).collect();
    keys.sort();
    keys
}

/// Asserts that both peers hold the same records.
pub fn assert_converged(client: &TestPeer, server: &TestPeer) {
    assert_eq!(contents::<Address>(client), contents::<Address>(server), "addresses differ");
    assert_eq!(contents::<Person>(client), contents::<Person>(server), "people differ");
    assert_eq!(contents::<LogEvent>(client), contents::<LogEvent>(server), "log events differ");
}
