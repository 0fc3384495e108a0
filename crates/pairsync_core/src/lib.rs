//! # pairsync core
//!
//! Change model and store contracts for pairsync.
//!
//! This crate provides:
//! - `SyncObject`, the serialization-neutral change envelope
//! - The `SyncEntity` and `Repository` contracts a store must satisfy
//! - Per-type `RepositoryFilter`s and the type-erased `FilterSet`
//! - The `IdCache` mapping global sync ids to store-local ids
//! - Session, request, issue and statistics types shared by every peer
//! - An injected `Clock` capability and the `Timestamp` type
//! - An in-memory reference store (`MemoryDatabase`)
//!
//! ## Key Invariants
//!
//! - A `SyncObject` is never mutated after creation
//! - Only `sync_id` is comparable across stores; local ids never are
//! - ID cache updates happen inside the repository commit that caused them
//! - Change windows are half-open: `[since, until)`

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod change_feed;
mod entity;
mod error;
mod filter;
mod id_cache;
mod issue;
mod memory;
mod merge;
mod object;
mod repository;
mod request;
mod session;
mod time;

pub use change_feed::{ChangeFeed, CollectionChange, CollectionListener};
pub use entity::{LocalId, Relationship, SyncEntity, SYNC_ID_FIELD};
pub use error::{CoreError, CoreResult};
pub use filter::{EntityLookup, EntityPredicate, FilterSet, RepositoryFilter};
pub use id_cache::IdCache;
pub use issue::{SyncIssue, SyncIssueType};
pub use memory::{MemoryDatabase, MemoryRepository};
pub use merge::{FieldMerger, FieldStamps};
pub use object::{SyncObject, SyncObjectStatus, Tombstone};
pub use repository::{Database, DatabaseExt, Repository};
pub use request::{SyncRequest, SyncResponse};
pub use session::{SyncOptions, SyncSession, SyncStatistics};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
