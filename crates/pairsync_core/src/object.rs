//! The change envelope exchanged between peers.

use crate::entity::SyncEntity;
use crate::error::{CoreError, CoreResult};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened to an entity inside the exported window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncObjectStatus {
    /// Created inside the window.
    Added,
    /// Updated inside the window.
    Modified,
    /// Soft-deleted inside the window.
    Deleted,
    /// Permanently removed from the source store. The payload is a
    /// [`Tombstone`].
    EntityDeleted,
}

impl fmt::Display for SyncObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::EntityDeleted => "entity-deleted",
        };
        f.write_str(name)
    }
}

/// Record of a permanent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Global id of the removed entity.
    pub sync_id: Uuid,
    /// When it was removed.
    pub deleted_on: Timestamp,
}

/// A serialized change to one entity.
///
/// Identity is `(type_name, sync_id)`. Objects are immutable: there are no
/// setters, and applying one never modifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncObject {
    type_name: String,
    sync_id: Uuid,
    payload: String,
    status: SyncObjectStatus,
}

impl SyncObject {
    /// Builds an object from raw parts.
    pub fn new(
        type_name: impl Into<String>,
        sync_id: Uuid,
        payload: impl Into<String>,
        status: SyncObjectStatus,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            sync_id,
            payload: payload.into(),
            status,
        }
    }

    /// Serializes an entity.
    pub fn from_entity<T: SyncEntity>(entity: &T, status: SyncObjectStatus) -> CoreResult<Self> {
        Ok(Self::new(
            T::TYPE_NAME,
            entity.sync_id(),
            serde_json::to_string(entity)?,
            status,
        ))
    }

    /// Serializes a permanent delete.
    pub fn tombstone(type_name: impl Into<String>, tombstone: &Tombstone) -> CoreResult<Self> {
        Ok(Self::new(
            type_name,
            tombstone.sync_id,
            serde_json::to_string(tombstone)?,
            SyncObjectStatus::EntityDeleted,
        ))
    }

    /// Entity type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Global id of the entity.
    pub fn sync_id(&self) -> Uuid {
        self.sync_id
    }

    /// Encoded entity, or tombstone for `EntityDeleted`.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Change status.
    pub fn status(&self) -> SyncObjectStatus {
        self.status
    }

    /// Returns true for permanent deletes.
    pub fn is_tombstone(&self) -> bool {
        self.status == SyncObjectStatus::EntityDeleted
    }

    /// Decodes the payload as `T`.
    pub fn to_entity<T: SyncEntity>(&self) -> CoreResult<T> {
        if self.type_name != T::TYPE_NAME {
            return Err(CoreError::type_mismatch(T::TYPE_NAME, &self.type_name));
        }
        if self.is_tombstone() {
            return Err(CoreError::InvalidStatus {
                type_name: self.type_name.clone(),
                message: "tombstone has no entity payload".into(),
            });
        }
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Decodes the payload as a tombstone.
    pub fn to_tombstone(&self) -> CoreResult<Tombstone> {
        if !self.is_tombstone() {
            return Err(CoreError::InvalidStatus {
                type_name: self.type_name.clone(),
                message: format!("expected entity-deleted, found {}", self.status),
            });
        }
        Ok(serde_json::from_str(&self.payload)?)
    }
}
