//! The entity contract every synchronized type implements.

use crate::time::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Field name of the global identifier, used as a merge exclusion.
pub const SYNC_ID_FIELD: &str = "sync_id";

/// Store-assigned primary key.
///
/// Local ids are only meaningful inside the store that assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub i64);

impl LocalId {
    /// Returns the raw value.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LocalId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A foreign key from one synced entity to another.
///
/// Inside a store the `local_id` is authoritative. On the wire the
/// `sync_id` is, and the receiver translates it back to its own local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    /// Name of the referencing field.
    pub field: &'static str,
    /// Type name of the referenced entity.
    pub target: &'static str,
    /// Referenced local id, in the store that holds this entity.
    pub local_id: Option<LocalId>,
    /// Referenced global id.
    pub sync_id: Option<Uuid>,
    /// Whether the entity is meaningless without its target.
    pub required: bool,
}

impl Relationship {
    /// Creates a required relationship.
    pub fn required(
        field: &'static str,
        target: &'static str,
        local_id: Option<LocalId>,
        sync_id: Option<Uuid>,
    ) -> Self {
        Self {
            field,
            target,
            local_id,
            sync_id,
            required: true,
        }
    }

    /// Creates an optional relationship.
    pub fn optional(
        field: &'static str,
        target: &'static str,
        local_id: Option<LocalId>,
        sync_id: Option<Uuid>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(field, target, local_id, sync_id)
        }
    }

    /// Returns true if the relationship points at nothing.
    pub fn is_empty(&self) -> bool {
        self.local_id.is_none() && self.sync_id.is_none()
    }
}

/// A domain record that can be synchronized.
///
/// Payloads are produced with `serde_json`, so the whole record, including
/// its local id and relationship ids, travels to the peer. The receiver
/// discards the foreign local ids and resolves relationships by sync id.
pub trait SyncEntity:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable type name used on the wire.
    const TYPE_NAME: &'static str;

    /// Records of an immutable type are never updated by sync.
    const IMMUTABLE: bool = false;

    /// Types this type references. Parents are exported and applied first.
    const DEPENDS_ON: &'static [&'static str] = &[];

    /// Global identifier.
    fn sync_id(&self) -> Uuid;

    /// Replaces the global identifier.
    fn set_sync_id(&mut self, sync_id: Uuid);

    /// Store-assigned primary key, `None` before the first save.
    fn local_id(&self) -> Option<LocalId>;

    /// Replaces the primary key.
    fn set_local_id(&mut self, local_id: Option<LocalId>);

    /// Creation time.
    fn created_on(&self) -> Timestamp;

    /// Time of the last change.
    fn modified_on(&self) -> Timestamp;

    /// Sets the time of the last change.
    fn set_modified_on(&mut self, modified_on: Timestamp);

    /// Soft-delete flag.
    fn is_deleted(&self) -> bool;

    /// Foreign keys to other synced entities.
    fn relationships(&self) -> Vec<Relationship> {
        Vec::new()
    }

    /// Rewrites one foreign key.
    fn set_relationship(&mut self, _field: &str, _local_id: Option<LocalId>, _sync_id: Option<Uuid>) {}

    /// Merges `update` into `self`, field by field.
    ///
    /// Fields named in `exclusions` are left alone. Returns true if any field
    /// changed.
    fn merge(&mut self, update: &Self, exclusions: &[&str]) -> bool;
}
