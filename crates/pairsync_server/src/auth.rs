//! Authentication support for the peer host.
//!
//! This module provides token-based authentication using HMAC-SHA256.
//! Tokens include a timestamp for expiration checking.
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 16 bytes: device_id
//! - 16 bytes: store_id
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 72 bytes.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 72;
const SIGNED_LEN: usize = 40;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Token validator for incoming requests.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a new auth token for a device and store.
    pub fn create_token(&self, device_id: Uuid, store_id: Uuid) -> ServerResult<Vec<u8>> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(device_id.as_bytes());
        token.extend_from_slice(store_id.as_bytes());
        token.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.sign(&token)?;
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a token for the given device and store.
    pub fn validate_token(&self, token: &[u8], device_id: Uuid, store_id: Uuid) -> ServerResult<()> {
        if token.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        let (signed, signature) = token.split_at(SIGNED_LEN);
        if &signed[0..16] != device_id.as_bytes() {
            return Err(ServerError::NotAuthorized("device id mismatch".into()));
        }
        if &signed[16..32] != store_id.as_bytes() {
            return Err(ServerError::NotAuthorized("store id mismatch".into()));
        }

        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&signed[32..40]);
        let issued = u64::from_be_bytes(timestamp);
        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(())
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid hmac key: {e}")))
    }

    /// Signs data with HMAC-SHA256.
    fn sign(&self, data: &[u8]) -> ServerResult<[u8; 32]> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let device_id = Uuid::new_v4();
        let store_id = Uuid::new_v4();

        let token = validator.create_token(device_id, store_id).unwrap();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(validator.validate_token(&token, device_id, store_id).is_ok());
    }

    #[test]
    fn reject_wrong_device() {
        let validator = validator();
        let store_id = Uuid::new_v4();
        let token = validator.create_token(Uuid::new_v4(), store_id).unwrap();
        assert!(validator
            .validate_token(&token, Uuid::new_v4(), store_id)
            .is_err());
    }

    #[test]
    fn reject_wrong_store() {
        let validator = validator();
        let device_id = Uuid::new_v4();
        let token = validator.create_token(device_id, Uuid::new_v4()).unwrap();
        assert!(validator
            .validate_token(&token, device_id, Uuid::new_v4())
            .is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let device_id = Uuid::new_v4();
        let store_id = Uuid::new_v4();

        let mut token = validator.create_token(device_id, store_id).unwrap();
        token[50] ^= 0xFF;
        assert!(validator.validate_token(&token, device_id, store_id).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = TokenValidator::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(0)),
        );
        let device_id = Uuid::new_v4();
        let store_id = Uuid::new_v4();

        let token = validator.create_token(device_id, store_id).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let err = validator
            .validate_token(&token, device_id, store_id)
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn reject_short_token() {
        let validator = validator();
        assert!(validator
            .validate_token(&[0u8; 10], Uuid::nil(), Uuid::nil())
            .is_err());
    }
}
