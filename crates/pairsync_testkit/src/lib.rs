//! # pairsync testkit
//!
//! Test utilities for pairsync.
//!
//! This crate provides:
//! - A sample entity model (`Address`, `Person`, `LogEvent`)
//! - In-memory test peers with manual clocks
//! - Property-based test generators using proptest
//! - JSON snapshots of sample stores
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pairsync_testkit::prelude::*;
//!
//! #[test]
//! fn addresses_reach_the_server() {
//!     let client = TestPeer::new("client");
//!     let server = TestPeer::new("server");
//!     client.insert(Address::new("1 Main St", "Springfield", client.now()));
//!
//!     engine(&client, &server).sync().unwrap();
//!     assert_converged(&client, &server);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod snapshot;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::snapshot::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use snapshot::*;
