use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use hostsync_core::ids::{ConnectionId, PlayerId};

/// Bidirectional connection <-> player binding.
///
/// At most one entry per key in either direction. The first registration
/// wins and later conflicting ones are ignored, so redelivered connect events
/// are harmless. Inserts lock the connection shard before the player shard.
#[derive(Default)]
pub struct ConnectionIdentityMap {
    by_conn: DashMap<ConnectionId, PlayerId>,
    by_player: DashMap<PlayerId, ConnectionId>,
}

impl ConnectionIdentityMap {
    pub fn new() -> Self {
        Self {
            by_conn: DashMap::new(),
            by_player: DashMap::new(),
        }
    }

    /// Bind `conn` to `player`. Returns false, changing nothing, when either
    /// side is already bound.
    pub fn insert(&self, conn: ConnectionId, player: PlayerId) -> bool {
        match self.by_conn.entry(conn) {
            Entry::Occupied(_) => false,
            Entry::Vacant(conn_slot) => match self.by_player.entry(player.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(player_slot) => {
                    player_slot.insert(conn);
                    conn_slot.insert(player);
                    true
                }
            },
        }
    }

    /// Drop the binding for `conn`. The reverse entry is only removed while
    /// it still points at `conn`.
    pub fn remove(&self, conn: ConnectionId) -> Option<PlayerId> {
        let (_, player) = self.by_conn.remove(&conn)?;
        self.by_player.remove_if(&player, |_, bound| *bound == conn);
        Some(player)
    }

    pub fn player_of(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.by_conn.get(&conn).map(|r| r.value().clone())
    }

    pub fn connection_of(&self, player: &PlayerId) -> Option<ConnectionId> {
        self.by_player.get(player).map(|r| *r.value())
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    pub fn clear(&self) {
        self.by_conn.clear();
        self.by_player.clear();
    }
}
