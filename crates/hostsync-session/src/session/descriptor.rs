use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hostsync_core::ids::PlayerId;

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub player_id: PlayerId,
    pub display_name: String,
    #[serde(default)]
    pub ready: bool,
}

impl PlayerRef {
    pub fn new(player_id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            display_name: display_name.into(),
            ready: false,
        }
    }
}

/// Snapshot of a lobby as reported by the lobby service.
///
/// Roster order is seating order; `roster[0]` is the designated host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub roster: Vec<PlayerRef>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SessionDescriptor {
    pub fn new(session_id: impl Into<String>, roster: Vec<PlayerRef>) -> Self {
        Self {
            session_id: session_id.into(),
            roster,
            metadata: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> Option<&PlayerRef> {
        self.roster.first()
    }

    pub fn player(&self, player_id: &PlayerId) -> Option<&PlayerRef> {
        self.roster.iter().find(|p| &p.player_id == player_id)
    }
}
