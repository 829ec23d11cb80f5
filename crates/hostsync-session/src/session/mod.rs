//! Session roster and identity registry.
//!
//! The coordinator owns the current lobby descriptor and the binding between
//! ephemeral transport connections and stable player identities. Query
//! helpers derive host/local-player facts from it.

mod coordinator;
mod descriptor;
mod identity_map;
mod query;
mod remote;

pub use coordinator::{DisplayName, SessionCoordinator};
pub use descriptor::{PlayerRef, SessionDescriptor};
pub use identity_map::ConnectionIdentityMap;
pub use query::{host_player_id, is_host, SessionQuery};
pub use remote::{AuthService, LobbyService};
