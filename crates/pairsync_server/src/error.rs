//! Error types for the peer host.

use pairsync_engine::SyncError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the peer host.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Request carries more objects than allowed.
    #[error("batch too large: {len} > {max}")]
    BatchTooLarge {
        /// Objects in the request.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// The device has too many open sessions.
    #[error("device {device_id} has too many open sessions (limit {limit})")]
    TooManySessions {
        /// Calling device.
        device_id: Uuid,
        /// Configured limit.
        limit: usize,
    },

    /// Protocol version mismatch.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// The served peer rejected the call.
    #[error("peer error: {0}")]
    Peer(#[from] SyncError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::NotAuthorized(_)
            | ServerError::BatchTooLarge { .. }
            | ServerError::TooManySessions { .. }
            | ServerError::ProtocolMismatch(_) => true,
            ServerError::Peer(e) => !e.is_retryable(),
            ServerError::Internal(_) => false,
        }
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns true if the caller may retry the request as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::TooManySessions { .. } => true,
            ServerError::Peer(e) => e.is_retryable(),
            other => other.is_server_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());

        let unknown = ServerError::Peer(SyncError::UnknownSession(Uuid::nil()));
        assert!(unknown.is_client_error());
        assert!(!unknown.is_retryable());

        let busy = ServerError::Peer(SyncError::TooManySessions { limit: 1 });
        assert!(busy.is_server_error());
        assert!(busy.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ServerError::BatchTooLarge { len: 10, max: 5 };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains('5'));
    }
}
