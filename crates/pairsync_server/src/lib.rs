//! # pairsync server
//!
//! Host that serves a sync peer to remote devices.
//!
//! This crate provides:
//! - Request dispatch for every peer operation
//! - Session ownership and per-device session limits
//! - Batch size limits
//! - Authentication (HMAC-SHA256 tokens)
//!
//! # Architecture
//!
//! The host wraps any `SyncClient`, usually a `StoreSyncClient` over the
//! host's own store. Requests arrive as CBOR `Envelope<PeerRequest>` bodies
//! posted to `/sync/<operation>` and are answered with
//! `Envelope<PeerResponse>`. The host keeps no sync state of its own beyond
//! which device opened which session.
//!
//! # Authentication
//!
//! Authentication is optional:
//!
//! ```rust,ignore
//! use pairsync_server::{ServerConfig, SyncServer};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::new(addr, store_id).with_auth(secret);
//! let server = SyncServer::new(config, peer);
//!
//! // Hand this to the device out of band.
//! let token = server.create_token(device_id)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
