//! Transport layer abstraction for remote peers.

use crate::error::{SyncError, SyncResult};
use crate::peer::SyncClient;
use parking_lot::Mutex;
use pairsync_core::{
    SyncIssue, SyncObject, SyncOptions, SyncRequest, SyncResponse, SyncSession, SyncStatistics,
};
use pairsync_protocol::{PeerRequest, PeerResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Carries peer requests to a remote peer host.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
pub trait PeerTransport: Send + Sync {
    /// Sends one request and waits for the answer.
    fn call(&self, request: PeerRequest) -> SyncResult<PeerResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A peer reached through a [`PeerTransport`].
#[derive(Debug)]
pub struct RemoteSyncClient<T: PeerTransport> {
    name: String,
    transport: T,
}

impl<T: PeerTransport> RemoteSyncClient<T> {
    /// Creates a remote peer.
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn call(&self, request: PeerRequest) -> SyncResult<PeerResponse> {
        if !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let operation = request.operation();
        let response = self.transport.call(request)?;
        tracing::trace!(peer = %self.name, operation, response = response.kind(), "remote call");
        Ok(response)
    }
}

impl<T: PeerTransport> SyncClient for RemoteSyncClient<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession> {
        let request = PeerRequest::BeginSync {
            session_id,
            options: options.clone(),
        };
        Ok(self.call(request)?.into_session()?)
    }

    fn get_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncObject>> {
        let request = PeerRequest::GetChanges {
            session_id,
            request: request.clone(),
        };
        Ok(self.call(request)?.into_changes()?)
    }

    fn apply_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncIssue>> {
        let request = PeerRequest::ApplyChanges {
            session_id,
            request: request.clone(),
        };
        Ok(self.call(request)?.into_issues()?)
    }

    fn get_corrections(
        &self,
        session_id: Uuid,
        issues: &[SyncIssue],
    ) -> SyncResult<SyncResponse<SyncObject>> {
        let request = PeerRequest::GetCorrections {
            session_id,
            issues: issues.to_vec(),
        };
        Ok(self.call(request)?.into_changes()?)
    }

    fn apply_corrections(
        &self,
        session_id: Uuid,
        collection: &[SyncObject],
    ) -> SyncResult<SyncResponse<SyncIssue>> {
        let request = PeerRequest::ApplyCorrections {
            session_id,
            collection: collection.to_vec(),
        };
        Ok(self.call(request)?.into_issues()?)
    }

    fn statistics(&self, session_id: Uuid) -> SyncResult<SyncStatistics> {
        Ok(self
            .call(PeerRequest::Statistics { session_id })?
            .into_statistics()?)
    }

    fn end_sync(&self, session_id: Uuid) -> SyncResult<SyncStatistics> {
        Ok(self
            .call(PeerRequest::EndSync { session_id })?
            .into_statistics()?)
    }
}

/// A mock transport for testing.
///
/// Answers each operation with a canned response and records every request.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<HashMap<&'static str, PeerResponse>>,
    requests: Mutex<Vec<PeerRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the response for an operation, e.g. `"get_changes"`.
    pub fn set_response(&self, operation: &'static str, response: PeerResponse) {
        self.responses.lock().insert(operation, response);
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<PeerRequest> {
        self.requests.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTransport for MockTransport {
    fn call(&self, request: PeerRequest) -> SyncResult<PeerResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let operation = request.operation();
        self.requests.lock().push(request);
        self.responses
            .lock()
            .get(operation)
            .cloned()
            .ok_or_else(|| SyncError::Protocol(format!("no mock response for {operation}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
