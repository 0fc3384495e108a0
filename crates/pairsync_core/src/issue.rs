//! Per-object apply failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why one object could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncIssueType {
    /// A referenced entity is missing on the receiving side.
    RelationshipConstraint,
    /// The receiving side refused to modify an existing record.
    UpdateException,
    /// The payload could not be decoded or validated.
    Unknown,
}

impl fmt::Display for SyncIssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RelationshipConstraint => "relationship constraint",
            Self::UpdateException => "update exception",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failure to apply one object. Never fatal to a run.
///
/// `id` is the sync id of the object that failed, so the source peer can
/// re-offer it through the corrections channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncIssue {
    /// Sync id of the failed object.
    pub id: Uuid,
    /// Failure category.
    pub issue_type: SyncIssueType,
    /// Human-readable detail. Empty when details are suppressed.
    pub message: String,
    /// Entity type of the failed object.
    pub type_name: String,
}

impl SyncIssue {
    /// Creates an issue.
    pub fn new(
        id: Uuid,
        issue_type: SyncIssueType,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            issue_type,
            message: message.into(),
            type_name: type_name.into(),
        }
    }

    /// A missing relationship target.
    pub fn relationship(id: Uuid, type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, SyncIssueType::RelationshipConstraint, type_name, message)
    }

    /// A refused update.
    pub fn update_exception(
        id: Uuid,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(id, SyncIssueType::UpdateException, type_name, message)
    }

    /// A decode or validation failure.
    pub fn unknown(id: Uuid, type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, SyncIssueType::Unknown, type_name, message)
    }

    /// Returns a copy without the message.
    pub fn without_details(&self) -> Self {
        Self {
            message: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.type_name, self.id, self.issue_type)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}
