//! Peer host configuration.

use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for the peer host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Identity of the served store, bound into auth tokens.
    pub store_id: Uuid,
    /// Maximum concurrently open sessions per device.
    pub max_sessions_per_device: usize,
    /// Maximum number of objects or issues in one request.
    pub max_batch: usize,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Token lifetime.
    pub token_expiry: Duration,
    /// Idle time after which an open session is ended by the host.
    pub session_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new configuration.
    pub fn new(bind_addr: SocketAddr, store_id: Uuid) -> Self {
        Self {
            bind_addr,
            store_id,
            max_sessions_per_device: 4,
            max_batch: 10_000,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            session_timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Sets the per-device session limit.
    pub fn with_max_sessions_per_device(mut self, max: usize) -> Self {
        self.max_sessions_per_device = max;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, size: usize) -> Self {
        self.max_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Sets the idle session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)), Uuid::nil())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_sessions_per_device, 4);
        assert!(!config.require_auth);
        assert!(config.store_id.is_nil());
    }

    #[test]
    fn config_builder() {
        let store = Uuid::new_v4();
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap(), store)
            .with_max_sessions_per_device(2)
            .with_max_batch(50)
            .with_auth(vec![1, 2, 3, 4])
            .with_token_expiry(Duration::from_secs(60))
            .with_session_timeout(Duration::from_secs(5));

        assert_eq!(config.store_id, store);
        assert_eq!(config.max_sessions_per_device, 2);
        assert_eq!(config.max_batch, 50);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
        assert_eq!(config.token_expiry, Duration::from_secs(60));
        assert_eq!(config.session_timeout, Duration::from_secs(5));
    }
}
