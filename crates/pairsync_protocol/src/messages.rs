//! Peer RPC messages.
//!
//! Every peer operation has one request variant and one expected response
//! variant:
//!
//! | Request            | Response     |
//! |--------------------|--------------|
//! | `BeginSync`        | `Session`    |
//! | `GetChanges`       | `Changes`    |
//! | `ApplyChanges`     | `Issues`     |
//! | `GetCorrections`   | `Changes`    |
//! | `ApplyCorrections` | `Issues`     |
//! | `Statistics`       | `Statistics` |
//! | `EndSync`          | `Statistics` |
//!
//! Any request may be answered with `Error`.

use crate::codec::{decode, encode};
use crate::error::{ProtocolError, ProtocolResult};
use pairsync_core::{
    SyncIssue, SyncObject, SyncOptions, SyncRequest, SyncResponse, SyncSession, SyncStatistics,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// A call to a remote peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerRequest {
    /// Opens (or re-enters) a session.
    BeginSync {
        /// Session id.
        session_id: Uuid,
        /// Run options. Filters are not transmitted.
        options: SyncOptions,
    },
    /// Exports one page of changes.
    GetChanges {
        /// Session id.
        session_id: Uuid,
        /// Window and paging.
        request: SyncRequest,
    },
    /// Applies a batch of changes.
    ApplyChanges {
        /// Session id.
        session_id: Uuid,
        /// Objects to apply.
        request: SyncRequest,
    },
    /// Exports the records named by issues.
    GetCorrections {
        /// Session id.
        session_id: Uuid,
        /// Issues reported by the other peer.
        issues: Vec<SyncIssue>,
    },
    /// Applies corrections.
    ApplyCorrections {
        /// Session id.
        session_id: Uuid,
        /// Objects to apply.
        collection: Vec<SyncObject>,
    },
    /// Reads session statistics.
    Statistics {
        /// Session id.
        session_id: Uuid,
    },
    /// Closes a session.
    EndSync {
        /// Session id.
        session_id: Uuid,
    },
}

impl PeerRequest {
    /// Operation name, also the last segment of the HTTP path.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::BeginSync { .. } => "begin_sync",
            Self::GetChanges { .. } => "get_changes",
            Self::ApplyChanges { .. } => "apply_changes",
            Self::GetCorrections { .. } => "get_corrections",
            Self::ApplyCorrections { .. } => "apply_corrections",
            Self::Statistics { .. } => "statistics",
            Self::EndSync { .. } => "end_sync",
        }
    }

    /// HTTP path the request is posted to.
    pub fn path(&self) -> String {
        format!("/sync/{}", self.operation())
    }

    /// Session the request belongs to.
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::BeginSync { session_id, .. }
            | Self::GetChanges { session_id, .. }
            | Self::ApplyChanges { session_id, .. }
            | Self::GetCorrections { session_id, .. }
            | Self::ApplyCorrections { session_id, .. }
            | Self::Statistics { session_id }
            | Self::EndSync { session_id } => *session_id,
        }
    }

    /// Number of objects or issues carried by the request.
    pub fn batch_len(&self) -> usize {
        match self {
            Self::ApplyChanges { request, .. } => request.collection.len(),
            Self::GetCorrections { issues, .. } => issues.len(),
            Self::ApplyCorrections { collection, .. } => collection.len(),
            _ => 0,
        }
    }
}

/// A remote peer's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerResponse {
    /// Answer to `BeginSync`.
    Session(SyncSession),
    /// Answer to `GetChanges` and `GetCorrections`.
    Changes(SyncResponse<SyncObject>),
    /// Answer to `ApplyChanges` and `ApplyCorrections`.
    Issues(SyncResponse<SyncIssue>),
    /// Answer to `Statistics` and `EndSync`.
    Statistics(SyncStatistics),
    /// The call failed.
    Error {
        /// What went wrong.
        message: String,
        /// Whether retrying the call may succeed.
        retryable: bool,
    },
}

impl PeerResponse {
    /// Creates an error response.
    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        Self::Error {
            message: message.into(),
            retryable,
        }
    }

    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Changes(_) => "changes",
            Self::Issues(_) => "issues",
            Self::Statistics(_) => "statistics",
            Self::Error { .. } => "error",
        }
    }

    /// Extracts a session.
    pub fn into_session(self) -> ProtocolResult<SyncSession> {
        match self {
            Self::Session(session) => Ok(session),
            other => Err(other.unexpected("session")),
        }
    }

    /// Extracts a page of changes.
    pub fn into_changes(self) -> ProtocolResult<SyncResponse<SyncObject>> {
        match self {
            Self::Changes(changes) => Ok(changes),
            other => Err(other.unexpected("changes")),
        }
    }

    /// Extracts apply issues.
    pub fn into_issues(self) -> ProtocolResult<SyncResponse<SyncIssue>> {
        match self {
            Self::Issues(issues) => Ok(issues),
            other => Err(other.unexpected("issues")),
        }
    }

    /// Extracts statistics.
    pub fn into_statistics(self) -> ProtocolResult<SyncStatistics> {
        match self {
            Self::Statistics(statistics) => Ok(statistics),
            other => Err(other.unexpected("statistics")),
        }
    }

    fn unexpected(self, expected: &'static str) -> ProtocolError {
        match self {
            Self::Error { message, retryable } => ProtocolError::Remote { message, retryable },
            other => ProtocolError::UnexpectedMessage {
                expected,
                actual: other.kind(),
            },
        }
    }
}

/// A versioned message with caller identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<M> {
    /// Protocol version of the sender.
    pub version: u16,
    /// Calling device.
    pub device_id: Uuid,
    /// Auth token, if the host requires one.
    pub token: Option<Vec<u8>>,
    /// The message.
    pub message: M,
}

impl<M> Envelope<M> {
    /// Wraps a message at the current protocol version.
    pub fn new(device_id: Uuid, message: M) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            device_id,
            token: None,
            message,
        }
    }

    /// Attaches an auth token.
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }
}

impl<M: Serialize + DeserializeOwned> Envelope<M> {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR, rejecting other protocol versions.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope: Self = decode(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: envelope.version,
            });
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_core::{SyncIssueType, SyncObjectStatus, Timestamp};

    fn object() -> SyncObject {
        SyncObject::new(
            "Address",
            Uuid::new_v4(),
            r#"{"line1":"Foo"}"#,
            SyncObjectStatus::Added,
        )
    }

    #[test]
    fn request_envelope_roundtrip() {
        let session_id = Uuid::new_v4();
        let request = PeerRequest::ApplyChanges {
            session_id,
            request: SyncRequest::apply(
                Timestamp::MIN,
                Timestamp::from_micros(100),
                vec![object(), object()],
            ),
        };
        let device = Uuid::new_v4();
        let bytes = Envelope::new(device, request)
            .with_token(vec![1, 2, 3])
            .encode()
            .unwrap();

        let decoded = Envelope::<PeerRequest>::decode(&bytes).unwrap();
        assert_eq!(decoded.device_id, device);
        assert_eq!(decoded.token, Some(vec![1, 2, 3]));
        assert_eq!(decoded.message.session_id(), session_id);
        assert_eq!(decoded.message.batch_len(), 2);
        assert_eq!(decoded.message.path(), "/sync/apply_changes");
    }

    #[test]
    fn begin_sync_keeps_cursors_but_not_filters() {
        let options = SyncOptions::new()
            .with_cursors(Timestamp::from_micros(7), Timestamp::MIN)
            .with_value("k", "v");
        let request = PeerRequest::BeginSync {
            session_id: Uuid::new_v4(),
            options,
        };
        let bytes = encode(&request).unwrap();
        let PeerRequest::BeginSync { options, .. } = decode(&bytes).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(options.last_synced_on_client, Timestamp::from_micros(7));
        assert!(options.last_synced_on_server.is_min());
        assert_eq!(options.value("k"), Some("v"));
        assert!(options.filters.is_empty());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut envelope = Envelope::new(Uuid::new_v4(), PeerRequest::EndSync {
            session_id: Uuid::new_v4(),
        });
        envelope.version = PROTOCOL_VERSION + 1;
        let bytes = envelope.encode().unwrap();
        assert!(matches!(
            Envelope::<PeerRequest>::decode(&bytes),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn response_extraction() {
        let issues = SyncResponse::complete(vec![SyncIssue::new(
            Uuid::new_v4(),
            SyncIssueType::RelationshipConstraint,
            "Person",
            "missing address",
        )]);
        let response = PeerResponse::Issues(issues.clone());
        let bytes = encode(&response).unwrap();
        let decoded: PeerResponse = decode(&bytes).unwrap();
        assert_eq!(decoded.into_issues().unwrap(), issues);

        let wrong = PeerResponse::Statistics(SyncStatistics::default());
        assert!(matches!(
            wrong.into_changes(),
            Err(ProtocolError::UnexpectedMessage {
                expected: "changes",
                actual: "statistics"
            })
        ));

        let failed = PeerResponse::error("unknown session", false);
        assert!(matches!(
            failed.into_session(),
            Err(ProtocolError::Remote { retryable: false, .. })
        ));
    }
}
