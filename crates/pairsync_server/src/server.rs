//! Peer host.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use pairsync_engine::{LoopbackServer, SyncClient};
use pairsync_protocol::{Envelope, PeerRequest, PeerResponse};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Serves one peer to remote devices.
///
/// The host checks the caller, enforces session and batch limits, and
/// answers every request with a [`PeerResponse`]. Failures are returned as
/// `PeerResponse::Error` so the caller can decide whether to retry.
///
/// # Example
///
/// ```rust,ignore
/// use pairsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default(), peer);
///
/// // An HTTP front end posts request bodies to handle_bytes().
/// let reply = server.handle_bytes("/sync/begin_sync", &body);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a host serving `peer`.
    pub fn new(config: ServerConfig, peer: Arc<dyn SyncClient>) -> Self {
        let context = Arc::new(HandlerContext::new(config, peer));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles one request.
    pub fn handle(&self, envelope: Envelope<PeerRequest>) -> PeerResponse {
        let operation = envelope.message.operation();
        match self.handler.handle(envelope) {
            Ok(response) => response,
            Err(e) => {
                warn!(operation, error = %e, "request failed");
                PeerResponse::error(e.to_string(), e.is_retryable())
            }
        }
    }

    /// Handles an encoded request posted to `path` and returns the encoded
    /// response envelope.
    pub fn handle_bytes(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let envelope = Envelope::<PeerRequest>::decode(body).map_err(|e| match e {
            pairsync_protocol::ProtocolError::VersionMismatch { .. } => {
                ServerError::ProtocolMismatch(e.to_string())
            }
            other => ServerError::InvalidRequest(other.to_string()),
        })?;

        let expected = envelope.message.path();
        if !path.ends_with(&expected) {
            return Err(ServerError::InvalidRequest(format!(
                "{} posted to {path}",
                envelope.message.operation()
            )));
        }

        let device_id = envelope.device_id;
        let response = self.handle(envelope);
        Envelope::new(device_id, response)
            .encode()
            .map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Issues a token for a device, if authentication is configured.
    pub fn create_token(&self, device_id: Uuid) -> ServerResult<Vec<u8>> {
        let validator = self
            .context
            .validator()
            .ok_or_else(|| ServerError::Internal("no auth secret configured".into()))?;
        validator.create_token(device_id, self.context.config.store_id)
    }

    /// Returns the host configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("context", &self.context)
            .finish()
    }
}

impl LoopbackServer for SyncServer {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.handle_bytes(path, body).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_core::SyncOptions;
    use pairsync_testkit::prelude::*;

    fn create_server(config: ServerConfig) -> (TestPeer, SyncServer) {
        let peer = TestPeer::new("server");
        let server = SyncServer::new(config, peer.peer.clone());
        (peer, server)
    }

    fn begin(device_id: Uuid, session_id: Uuid) -> Envelope<PeerRequest> {
        Envelope::new(
            device_id,
            PeerRequest::BeginSync {
                session_id,
                options: SyncOptions::default(),
            },
        )
    }

    #[test]
    fn errors_become_error_responses() {
        let (_peer, server) = create_server(ServerConfig::default());
        let response = server.handle(Envelope::new(
            Uuid::new_v4(),
            PeerRequest::Statistics {
                session_id: Uuid::new_v4(),
            },
        ));
        assert!(matches!(response, PeerResponse::Error { retryable: false, .. }));
    }

    #[test]
    fn bytes_roundtrip() {
        let (_peer, server) = create_server(ServerConfig::default());
        let device = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let body = begin(device, session_id).encode().unwrap();

        let reply = server.handle_bytes("/sync/begin_sync", &body).unwrap();
        let envelope = Envelope::<PeerResponse>::decode(&reply).unwrap();
        assert_eq!(envelope.device_id, device);
        assert_eq!(envelope.message.into_session().unwrap().id, session_id);
        assert_eq!(server.session_count(), 1);
    }

    #[test]
    fn wrong_path_is_rejected() {
        let (_peer, server) = create_server(ServerConfig::default());
        let body = begin(Uuid::new_v4(), Uuid::new_v4()).encode().unwrap();
        let err = server.handle_bytes("/sync/end_sync", &body).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        let (_peer, server) = create_server(ServerConfig::default());
        assert!(server.handle_post("/sync/begin_sync", b"garbage").is_err());
    }

    #[test]
    fn tokens_require_a_secret() {
        let (_peer, server) = create_server(ServerConfig::default());
        assert!(server.create_token(Uuid::new_v4()).is_err());

        let (_peer, server) =
            create_server(ServerConfig::default().with_auth(b"another-secret-32-bytes-long!!!".to_vec()));
        let token = server.create_token(Uuid::new_v4()).unwrap();
        assert_eq!(token.len(), 72);
    }
}
