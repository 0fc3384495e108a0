//! # pairsync protocol
//!
//! RPC messages used to reach a remote sync peer.
//!
//! This crate provides:
//! - `PeerRequest` / `PeerResponse`, one request variant per peer operation
//! - `Envelope`, which carries the protocol version, the calling device and
//!   an optional auth token
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;

pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{Envelope, PeerRequest, PeerResponse, PROTOCOL_VERSION};
