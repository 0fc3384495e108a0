//! Error types for pairsync core.

use thiserror::Error;
use uuid::Uuid;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A `SyncObject` was decoded as the wrong entity type.
    #[error("type mismatch: object is {actual}, expected {expected}")]
    TypeMismatch {
        /// Type the caller asked for.
        expected: String,
        /// Type carried by the object.
        actual: String,
    },

    /// The store has no repository for the entity type.
    #[error("no repository registered for type {0}")]
    MissingRepository(String),

    /// A repository is registered under the name but for another Rust type.
    #[error("repository for {0} has an unexpected entity type")]
    RepositoryType(String),

    /// An update referenced an entity that does not exist.
    #[error("entity {local_id} of type {type_name} not found")]
    EntityNotFound {
        /// Entity type.
        type_name: String,
        /// Local id that was not found.
        local_id: i64,
    },

    /// An insert reused a local id that already exists.
    #[error("entity {local_id} of type {type_name} already exists")]
    DuplicateLocalId {
        /// Entity type.
        type_name: String,
        /// Local id that collided.
        local_id: i64,
    },

    /// An insert reused a sync id that already exists.
    #[error("sync id {sync_id} of type {type_name} already exists")]
    DuplicateSyncId {
        /// Entity type.
        type_name: String,
        /// Sync id that collided.
        sync_id: Uuid,
    },

    /// The object is not a tombstone (or is one when an entity was expected).
    #[error("invalid object status for {type_name}: {message}")]
    InvalidStatus {
        /// Entity type.
        type_name: String,
        /// What was wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::type_mismatch("Person", "Address");
        assert_eq!(
            err.to_string(),
            "type mismatch: object is Address, expected Person"
        );

        let err = CoreError::EntityNotFound {
            type_name: "Address".into(),
            local_id: 7,
        };
        assert!(err.to_string().contains('7'));
    }
}
