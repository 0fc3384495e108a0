//! HTTP transport implementation.
//!
//! Every peer request is wrapped in an [`Envelope`], encoded as CBOR and
//! posted to `<base_url>/sync/<operation>`. The actual HTTP client is
//! abstracted via a trait to allow different implementations (reqwest,
//! hyper, etc.).

use crate::error::{SyncError, SyncResult};
use crate::transport::PeerTransport;
use parking_lot::RwLock;
use pairsync_protocol::{Envelope, PeerRequest, PeerResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
/// This allows using different HTTP libraries (reqwest, hyper, ureq, etc.)
/// or even non-HTTP transports (WebSocket, gRPC).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based peer transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the peer host (e.g., "https://sync.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Identity sent with every request.
    device_id: Uuid,
    /// Auth token sent with every request.
    token: Option<Vec<u8>>,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, device_id: Uuid, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            device_id,
            token: None,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the auth token issued by the peer host.
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the device id.
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }
}

impl<C: HttpClient> PeerTransport for HttpTransport<C> {
    fn call(&self, request: PeerRequest) -> SyncResult<PeerResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let url = format!("{}{}", self.base_url, request.path());
        let mut envelope = Envelope::new(self.device_id, request);
        if let Some(token) = &self.token {
            envelope = envelope.with_token(token.clone());
        }
        let body = envelope.encode()?;

        let response_body = self.client.post(&url, body).map_err(|e| {
            self.set_error(&e);
            SyncError::transport_retryable(e)
        })?;
        self.clear_error();

        let response = Envelope::<PeerResponse>::decode(&response_body)?;
        Ok(response.message)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("device_id", &self.device_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a peer host.
///
/// Useful for testing without actual network overhead.
#[derive(Debug)]
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_core::SyncStatistics;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        last_url: RwLock<Option<String>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                last_url: RwLock::new(None),
                healthy: AtomicBool::new(true),
            }
        }

        fn set_response(&self, resp: Vec<u8>) {
            *self.response.write() = Some(resp);
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    impl HttpClient for TestClient {
        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            *self.last_url.write() = Some(url.to_string());
            self.response
                .read()
                .clone()
                .ok_or_else(|| "No response set".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    struct Echo;

    impl LoopbackServer for Echo {
        fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
            let mut out = path.as_bytes().to_vec();
            out.extend_from_slice(body);
            Ok(out)
        }
    }

    #[test]
    fn loopback_routes_path_through_shared_server() {
        let shared: Arc<dyn LoopbackServer + Send + Sync> = Arc::new(Echo);
        let client = LoopbackClient::new(Arc::clone(&shared));
        let reply = client
            .post("https://sync.example.com/sync/end", b"!".to_vec())
            .unwrap();
        assert_eq!(reply, b"/sync/end!".to_vec());
        assert!(client.is_healthy());
    }

    fn transport(client: TestClient) -> HttpTransport<TestClient> {
        HttpTransport::new("https://sync.example.com", Uuid::new_v4(), client)
    }

    #[test]
    fn transport_creation() {
        let transport = transport(TestClient::new());
        assert_eq!(transport.base_url(), "https://sync.example.com");
        assert!(transport.is_connected());
    }

    #[test]
    fn transport_not_connected_error() {
        let transport = transport(TestClient::new());
        transport.close().unwrap();

        let result = transport.call(PeerRequest::EndSync {
            session_id: Uuid::new_v4(),
        });
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn transport_unhealthy_client() {
        let client = TestClient::new();
        client.set_healthy(false);
        assert!(!transport(client).is_connected());
    }

    #[test]
    fn post_failure_is_retryable() {
        let transport = transport(TestClient::new());
        let err = transport
            .call(PeerRequest::Statistics {
                session_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("No response set"));
        assert!(transport.is_connected());
    }

    #[test]
    fn posts_to_operation_path() {
        let client = TestClient::new();
        let statistics = SyncStatistics {
            changes_applied: 3,
            ..SyncStatistics::default()
        };
        let body = Envelope::new(Uuid::nil(), PeerResponse::Statistics(statistics))
            .encode()
            .unwrap();
        client.set_response(body);

        let transport = transport(client);
        let response = transport
            .call(PeerRequest::Statistics {
                session_id: Uuid::new_v4(),
            })
            .unwrap();

        assert_eq!(response, PeerResponse::Statistics(statistics));
        assert_eq!(
            transport.client.last_url.read().as_deref(),
            Some("https://sync.example.com/sync/statistics")
        );
    }
}
