use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::{ConnectionId, PlayerId};

use crate::obs::SessionMetrics;

use super::{ConnectionIdentityMap, LobbyService, SessionDescriptor};

/// Display name resolution result. Each tier is distinguishable so callers
/// can render "not connected" state differently from an unknown player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayName {
    /// No session at all: `"(offline) <id>"`.
    Offline(String),
    /// Session present but the id is not on the roster: `"Player_<id>"`.
    Unlisted(String),
    /// Roster display name.
    Listed(String),
}

impl DisplayName {
    pub fn as_str(&self) -> &str {
        match self {
            DisplayName::Offline(s) | DisplayName::Unlisted(s) | DisplayName::Listed(s) => s,
        }
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct CoordinatorState {
    descriptor: Option<SessionDescriptor>,
    join_code: Option<String>,
}

/// Registry for the current session descriptor and connection identities.
///
/// One instance per session, owned by the `SessionContext`.
pub struct SessionCoordinator {
    lobby: Arc<dyn LobbyService>,
    join_code_key: String,
    state: RwLock<CoordinatorState>,
    identities: ConnectionIdentityMap,
    metrics: Arc<SessionMetrics>,
}

impl SessionCoordinator {
    pub fn new(lobby: Arc<dyn LobbyService>, join_code_key: impl Into<String>, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            lobby,
            join_code_key: join_code_key.into(),
            state: RwLock::new(CoordinatorState::default()),
            identities: ConnectionIdentityMap::new(),
            metrics,
        }
    }

    /// Replace the descriptor wholesale and re-derive the join code.
    pub fn set_session(&self, descriptor: SessionDescriptor) {
        let join_code = descriptor.metadata.get(&self.join_code_key).cloned();
        tracing::debug!(
            session = %descriptor.session_id,
            players = descriptor.roster.len(),
            has_join_code = join_code.is_some(),
            "session descriptor set"
        );
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        st.descriptor = Some(descriptor);
        st.join_code = join_code;
    }

    pub fn clear_session(&self) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        st.descriptor = None;
        st.join_code = None;
    }

    pub fn descriptor(&self) -> Option<SessionDescriptor> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).descriptor.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .descriptor
            .as_ref()
            .map(|d| d.session_id.clone())
    }

    pub fn join_code(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).join_code.clone()
    }

    /// Bind a connection to a player. First registration wins; a call whose
    /// connection or player is already bound is a no-op returning false.
    pub fn register_connection(&self, conn: ConnectionId, player: PlayerId) -> bool {
        let inserted = self.identities.insert(conn, player.clone());
        if inserted {
            tracing::info!(%conn, %player, "connection registered");
        } else {
            tracing::debug!(%conn, %player, "duplicate registration ignored");
        }
        inserted
    }

    pub fn unregister_connection(&self, conn: ConnectionId) -> Option<PlayerId> {
        let player = self.identities.remove(conn);
        if let Some(p) = &player {
            tracing::info!(%conn, player = %p, "connection unregistered");
        }
        player
    }

    pub fn lookup_player_id(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.identities.player_of(conn)
    }

    pub fn lookup_connection_id(&self, player: &PlayerId) -> Option<ConnectionId> {
        self.identities.connection_of(player)
    }

    /// Like `lookup_player_id`, but a miss is an `UnresolvedIdentity` error
    /// (logged and counted).
    pub fn resolve_sender(&self, conn: ConnectionId) -> Result<PlayerId> {
        self.lookup_player_id(conn).ok_or_else(|| {
            self.metrics.unresolved_identities.inc(&[]);
            tracing::warn!(%conn, "frame from unregistered connection");
            HostSyncError::UnresolvedIdentity(format!("no player bound to {conn}"))
        })
    }

    pub fn resolve_display_name(&self, player: &PlayerId) -> DisplayName {
        let st = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &st.descriptor {
            None => DisplayName::Offline(format!("(offline) {player}")),
            Some(d) => match d.player(player) {
                Some(p) => DisplayName::Listed(p.display_name.clone()),
                None => DisplayName::Unlisted(format!("Player_{player}")),
            },
        }
    }

    /// Pull the latest descriptor for the current session and replace the
    /// local copy. On failure the previous snapshot stays in place and
    /// `StaleDescriptor` is returned.
    pub async fn refresh(&self) -> Result<SessionDescriptor> {
        let session_id = self
            .session_id()
            .ok_or_else(|| HostSyncError::NotConnected("no active session to refresh".into()))?;

        let fresh = match self.lobby.get_lobby(&session_id).await {
            Ok(d) => d,
            Err(e) => {
                self.metrics.lobby_failures.inc(&[("op", "get_lobby")]);
                tracing::warn!(session = %session_id, error = %e, "lobby refresh failed; keeping previous descriptor");
                return Err(HostSyncError::StaleDescriptor(e.to_string()));
            }
        };

        // The session may have been left or swapped while the fetch was in flight.
        if self.session_id().as_deref() != Some(session_id.as_str()) {
            tracing::debug!(session = %session_id, "discarding refresh for a session no longer active");
            return Err(HostSyncError::StaleDescriptor(format!(
                "session {session_id} is no longer active"
            )));
        }

        self.set_session(fresh.clone());
        Ok(fresh)
    }

    /// Publish the relay join code in the lobby metadata, then refresh.
    pub async fn publish_join_code(&self, code: &str) -> Result<SessionDescriptor> {
        let session_id = self
            .session_id()
            .ok_or_else(|| HostSyncError::NotConnected("no active session".into()))?;

        if let Err(e) = self.lobby.update_metadata(&session_id, &self.join_code_key, code).await {
            self.metrics.lobby_failures.inc(&[("op", "update_metadata")]);
            tracing::warn!(session = %session_id, error = %e, "publishing join code failed");
            return Err(e);
        }
        self.refresh().await
    }

    /// Drop descriptor and every identity binding.
    pub fn reset(&self) {
        self.clear_session();
        self.identities.clear();
    }
}
