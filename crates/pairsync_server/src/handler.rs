//! Request handling for peer endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use pairsync_engine::SyncClient;
use pairsync_protocol::{Envelope, PeerRequest, PeerResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The peer served to remote devices.
    pub peer: Arc<dyn SyncClient>,
    validator: Option<TokenValidator>,
    /// Open sessions (session_id -> owner).
    sessions: RwLock<HashMap<Uuid, DeviceSession>>,
}

/// An open session and the device that opened it.
#[derive(Debug, Clone)]
struct DeviceSession {
    device_id: Uuid,
    opened_at: Instant,
    last_seen: Instant,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, peer: Arc<dyn SyncClient>) -> Self {
        let validator = config.auth_secret.as_ref().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(config.token_expiry))
        });
        Self {
            config,
            peer,
            validator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the token validator, if a secret is configured.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn sessions_of(&self, device_id: Uuid) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.device_id == device_id)
            .count()
    }

    fn owner(&self, session_id: Uuid) -> Option<Uuid> {
        self.sessions.read().get(&session_id).map(|s| s.device_id)
    }

    fn register_session(&self, session_id: Uuid, device_id: Uuid) {
        let now = Instant::now();
        self.sessions.write().insert(
            session_id,
            DeviceSession {
                device_id,
                opened_at: now,
                last_seen: now,
            },
        );
    }

    fn touch(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.write().get_mut(&session_id) {
            session.last_seen = Instant::now();
        }
    }

    /// Ends every session idle for at least the configured timeout.
    ///
    /// Returns the number of sessions ended.
    pub fn expire_sessions(&self) -> usize {
        let timeout = self.config.session_timeout;
        let expired: Vec<(Uuid, DeviceSession)> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, s)| s.last_seen.elapsed() >= timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };

        for (session_id, session) in &expired {
            if let Err(e) = self.peer.end_sync(*session_id) {
                warn!(session_id = %session_id, error = %e, "failed to end expired session");
            }
            debug!(
                session_id = %session_id,
                device_id = %session.device_id,
                elapsed_ms = session.opened_at.elapsed().as_millis() as u64,
                "session expired"
            );
        }
        expired.len()
    }

    fn unregister_session(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.write().remove(&session_id) {
            debug!(
                session_id = %session_id,
                elapsed_ms = session.opened_at.elapsed().as_millis() as u64,
                "session closed"
            );
        }
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("peer", &self.peer.name())
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// Handler for peer requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Checks the caller and dispatches the request to the peer.
    pub fn handle(&self, envelope: Envelope<PeerRequest>) -> ServerResult<PeerResponse> {
        let device_id = envelope.device_id;
        self.authenticate(device_id, envelope.token.as_deref())?;
        self.context.expire_sessions();

        let request = envelope.message;
        let max = self.context.config.max_batch;
        let len = request.batch_len();
        if len > max {
            return Err(ServerError::BatchTooLarge { len, max });
        }

        let session_id = request.session_id();
        if let Some(owner) = self.context.owner(session_id) {
            if owner != device_id {
                warn!(session_id = %session_id, device_id = %device_id, "session owned by another device");
                return Err(ServerError::NotAuthorized(format!(
                    "session {session_id} belongs to another device"
                )));
            }
            self.context.touch(session_id);
        }

        debug!(
            operation = request.operation(),
            session_id = %session_id,
            device_id = %device_id,
            batch = len,
            "handling request"
        );
        self.dispatch(device_id, request)
    }

    fn authenticate(&self, device_id: Uuid, token: Option<&[u8]>) -> ServerResult<()> {
        if !self.context.config.require_auth {
            return Ok(());
        }
        let validator = self
            .context
            .validator()
            .ok_or_else(|| ServerError::Internal("auth required but no secret set".into()))?;
        let token = token.ok_or_else(|| ServerError::NotAuthorized("missing token".into()))?;
        validator.validate_token(token, device_id, self.context.config.store_id)
    }

    fn dispatch(&self, device_id: Uuid, request: PeerRequest) -> ServerResult<PeerResponse> {
        let peer = &self.context.peer;
        let response = match request {
            PeerRequest::BeginSync {
                session_id,
                options,
            } => {
                let limit = self.context.config.max_sessions_per_device;
                let reentry = self.context.owner(session_id).is_some();
                if !reentry && self.context.sessions_of(device_id) >= limit {
                    return Err(ServerError::TooManySessions { device_id, limit });
                }
                let session = peer.begin_sync(session_id, &options)?;
                self.context.register_session(session_id, device_id);
                PeerResponse::Session(session)
            }
            PeerRequest::GetChanges {
                session_id,
                request,
            } => PeerResponse::Changes(peer.get_changes(session_id, &request)?),
            PeerRequest::ApplyChanges {
                session_id,
                request,
            } => PeerResponse::Issues(peer.apply_changes(session_id, &request)?),
            PeerRequest::GetCorrections { session_id, issues } => {
                PeerResponse::Changes(peer.get_corrections(session_id, &issues)?)
            }
            PeerRequest::ApplyCorrections {
                session_id,
                collection,
            } => PeerResponse::Issues(peer.apply_corrections(session_id, &collection)?),
            PeerRequest::Statistics { session_id } => {
                PeerResponse::Statistics(peer.statistics(session_id)?)
            }
            PeerRequest::EndSync { session_id } => {
                let statistics = peer.end_sync(session_id);
                self.context.unregister_session(session_id);
                PeerResponse::Statistics(statistics?)
            }
        };
        Ok(response)
    }
}
