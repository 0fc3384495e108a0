//! # pairsync engine
//!
//! Bidirectional sync between two peers, each serving its own store.
//!
//! This crate provides:
//! - The `SyncClient` peer contract and `StoreSyncClient`, a peer over a
//!   local `Database`
//! - `SyncSchema`, the per-peer type registry in dependency order
//! - `SyncEngine`, which runs passes until both peers stop changing and then
//!   exchanges corrections for reported issues
//! - Retry with exponential backoff
//! - Remote peers over a `PeerTransport` (HTTP, loopback, mock)
//!
//! ## Architecture
//!
//! Each pass exports the client's changes since its cursor and applies them
//! on the server, then does the same from server to client. Only sync ids
//! cross the boundary; each peer translates them to local ids through its
//! ID cache. Per-object failures never abort a run; they come back as
//! `SyncIssue`s and block that direction's cursor.
//!
//! ## Key Invariants
//!
//! - Windows are half-open and bounded by each peer's session start
//! - A cursor only advances when its direction finished without issues
//! - Parents are applied before children within a batch
//! - Both peers are told to end the session, even when the run fails

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod peer;
mod schema;
mod state;
mod transport;

pub use config::{PeerConfig, RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use peer::{StoreSyncClient, SyncClient};
pub use schema::{SyncSchema, SyncSchemaBuilder};
pub use state::{SyncEngine, SyncRunResult, SyncState, SyncStats};
pub use transport::{MockTransport, PeerTransport, RemoteSyncClient};
