//! Replication wire protocol.
//!
//! Every message between participants is a single JSON [`frame::Frame`]
//! addressed to a named channel. The payload stays a `RawValue` until the
//! receiving channel knows which type to parse it into.
//!
//! Decoding is panic-free: malformed input is reported as `HostSyncError`
//! so a hostile or buggy peer cannot take the reader loop down.

pub mod frame;

pub use frame::{decode_frame, Frame, FrameKind, Hello, PROTOCOL_VERSION, SYS_CHANNEL};
