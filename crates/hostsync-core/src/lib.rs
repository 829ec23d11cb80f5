//! hostsync core: transport-agnostic identity types, error taxonomy, and the
//! replication wire frame.
//!
//! This crate defines the contracts shared by the session runtime and any
//! tooling that needs to speak the frame format. It intentionally carries no
//! transport or runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! Malformed frames from a remote peer surface as `HostSyncError` so a
//! misbehaving participant cannot crash the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod ids;
pub mod protocol;

pub use error::{ErrorCode, HostSyncError, Result};
pub use ids::{ConnectionId, PlayerId};
