use hostsync_core::ids::PlayerId;

use crate::session::AuthService;

/// Fixed sign-in state.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    player: Option<PlayerId>,
}

impl StaticAuth {
    pub fn signed_in(player: impl Into<PlayerId>) -> Self {
        Self {
            player: Some(player.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { player: None }
    }
}

impl AuthService for StaticAuth {
    fn is_signed_in(&self) -> bool {
        self.player.is_some()
    }

    fn player_id(&self) -> Option<PlayerId> {
        self.player.clone()
    }
}
