//! In-process stand-ins for the relay, lobby, auth and transport services.
//!
//! Used by the demo binary and the test suites; a deployment plugs real
//! service clients into the same traits.

pub mod auth;
pub mod lobby;
pub mod relay;
pub mod transport;

pub use auth::StaticAuth;
pub use lobby::InMemoryLobby;
pub use relay::InMemoryRelay;
pub use transport::{LoopbackHub, LoopbackTransport};
