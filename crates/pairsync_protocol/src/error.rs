//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or interpreting messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be decoded as a message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Our version.
        expected: u16,
        /// The peer's version.
        actual: u16,
    },

    /// A response did not match the request.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// What the caller waited for.
        expected: &'static str,
        /// What arrived.
        actual: &'static str,
    },

    /// The peer answered with an error.
    #[error("remote error: {message}")]
    Remote {
        /// Error text from the peer.
        message: String,
        /// Whether retrying the call may succeed.
        retryable: bool,
    },
}
