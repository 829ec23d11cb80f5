//! Top-level facade crate for hostsync.
//!
//! Re-exports core types and the session library so users can depend on a single crate.

pub mod core {
    pub use hostsync_core::*;
}

pub mod session {
    pub use hostsync_session::*;
}
