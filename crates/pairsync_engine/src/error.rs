//! Error types for the sync engine.

use pairsync_core::CoreError;
use pairsync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a sync run.
///
/// Per-object failures are never errors; they are reported as
/// `SyncIssue`s.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (unexpected or malformed message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote peer host failed.
    #[error("server error: {0}")]
    ServerError(String),

    /// Store error outside of per-object apply.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// Invalid type registry.
    #[error("schema error: {0}")]
    Schema(String),

    /// No open session with this id.
    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    /// The peer already serves its maximum number of sessions.
    #[error("too many sessions (limit {limit})")]
    TooManySessions {
        /// Configured limit.
        limit: usize,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(String),

    /// Not connected.
    #[error("not connected to peer")]
    NotConnected,

    /// Version mismatch.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            SyncError::TooManySessions { .. } => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(message) | ProtocolError::Decode(message) => {
                SyncError::Codec(message)
            }
            ProtocolError::VersionMismatch { expected, actual } => SyncError::VersionMismatch {
                local: expected,
                remote: actual,
            },
            ProtocolError::UnexpectedMessage { .. } => SyncError::Protocol(err.to_string()),
            ProtocolError::Remote { message, retryable } => {
                SyncError::Transport { message, retryable }
            }
        }
    }
}
