use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use hostsync_core::error::{HostSyncError, Result};

use crate::session::{LobbyService, PlayerRef, SessionDescriptor};

/// Lobby backend kept in memory. `set_available(false)` makes every call
/// fail, for exercising refresh failure paths.
pub struct InMemoryLobby {
    lobbies: DashMap<String, SessionDescriptor>,
    available: AtomicBool,
}

impl Default for InMemoryLobby {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLobby {
    pub fn new() -> Self {
        Self {
            lobbies: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Insert or replace a lobby.
    pub fn put(&self, descriptor: SessionDescriptor) {
        self.lobbies.insert(descriptor.session_id.clone(), descriptor);
    }

    /// Append a player to the roster (no-op if already present).
    pub fn join(&self, session_id: &str, player: PlayerRef) -> Result<()> {
        let mut lobby = self
            .lobbies
            .get_mut(session_id)
            .ok_or_else(|| HostSyncError::LobbyService(format!("unknown lobby: {session_id}")))?;
        if lobby.player(&player.player_id).is_none() {
            lobby.roster.push(player);
        }
        Ok(())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(HostSyncError::LobbyService("lobby service unreachable".into()))
        }
    }
}

#[async_trait]
impl LobbyService for InMemoryLobby {
    async fn get_lobby(&self, session_id: &str) -> Result<SessionDescriptor> {
        self.check_available()?;
        self.lobbies
            .get(session_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| HostSyncError::LobbyService(format!("unknown lobby: {session_id}")))
    }

    async fn update_metadata(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut lobby = self
            .lobbies
            .get_mut(session_id)
            .ok_or_else(|| HostSyncError::LobbyService(format!("unknown lobby: {session_id}")))?;
        lobby.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
