use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use hostsync_core::ids::ConnectionId;

/// One connected peer's outbound queue.
#[derive(Clone)]
pub struct Peer {
    pub tx: mpsc::Sender<Bytes>,
}

/// Host-side registry: `connection_id -> Peer`.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<ConnectionId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn insert(&self, conn: ConnectionId, peer: Peer) {
        self.peers.insert(conn, peer);
    }

    pub fn remove(&self, conn: ConnectionId) -> Option<Peer> {
        self.peers.remove(&conn).map(|(_, p)| p)
    }

    pub fn get(&self, conn: ConnectionId) -> Option<Peer> {
        self.peers.get(&conn).map(|r| r.value().clone())
    }

    /// Snapshot of every peer; no shard lock is held afterwards.
    pub fn all(&self) -> Vec<(ConnectionId, Peer)> {
        self.peers
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&self) {
        self.peers.clear();
    }
}
