//! hostsync session library.
//!
//! Wires relay bootstrap, the session coordinator, host-authoritative state
//! channels and the built-in services into one `SessionContext` per session.
//! Consumed by the demo binary (`main.rs`) and by integration tests.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod loopback;
pub mod obs;
pub mod ops;
pub mod relay;
pub mod replication;
pub mod router;
pub mod services;
pub mod session;
pub mod transport;
