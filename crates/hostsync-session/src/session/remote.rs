//! Contracts for the remote lobby and authentication services.

use async_trait::async_trait;

use hostsync_core::error::Result;
use hostsync_core::ids::PlayerId;

use super::SessionDescriptor;

/// Remote lobby service.
#[async_trait]
pub trait LobbyService: Send + Sync {
    /// Latest snapshot of the lobby (roster + metadata bag).
    async fn get_lobby(&self, session_id: &str) -> Result<SessionDescriptor>;

    /// Set one metadata entry (e.g. the relay join code).
    async fn update_metadata(&self, session_id: &str, key: &str, value: &str) -> Result<()>;
}

/// Authentication service. `player_id` is only meaningful once signed in.
pub trait AuthService: Send + Sync {
    fn is_signed_in(&self) -> bool;
    fn player_id(&self) -> Option<PlayerId>;
}
