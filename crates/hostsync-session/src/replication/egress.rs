use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::ConnectionId;
use hostsync_core::protocol::Frame;

use crate::obs::SessionMetrics;

use super::PeerRegistry;

/// Host-side egress: unicast and fan-out to connected peers.
pub struct Egress {
    peers: Arc<PeerRegistry>,
    send_timeout: Duration,
    metrics: Arc<SessionMetrics>,
}

impl Egress {
    pub fn new(peers: Arc<PeerRegistry>, send_timeout: Duration, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            peers,
            send_timeout,
            metrics,
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Unicast with the configured timeout. A timed-out frame is not lost:
    /// it is handed to a background task that waits for queue space.
    pub async fn send_to(&self, conn: ConnectionId, bytes: Bytes) -> Result<()> {
        let peer = self
            .peers
            .get(conn)
            .ok_or_else(|| HostSyncError::NotConnected(format!("{conn} is not connected")))?;

        match timeout(self.send_timeout, peer.tx.send(bytes.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HostSyncError::NotConnected(format!("{conn} queue closed"))),
            Err(_) => {
                self.metrics.broadcast_timeouts.inc(&[("kind", "unicast")]);
                tracing::warn!(%conn, "unicast timed out; delivery deferred");
                defer(conn, peer.tx, bytes);
                Ok(())
            }
        }
    }

    /// Reliable broadcast: send concurrently with a per-peer timeout.
    /// Returns how many peers accepted the frame.
    pub async fn broadcast(&self, bytes: Bytes) -> usize {
        let mut futs = FuturesUnordered::new();
        for (conn, peer) in self.peers.all() {
            let msg = bytes.clone();
            let send_timeout = self.send_timeout;
            futs.push(async move {
                let res = timeout(send_timeout, peer.tx.send(msg.clone())).await;
                (conn, peer, msg, res)
            });
        }

        let mut delivered = 0;
        while let Some((conn, peer, msg, res)) = futs.next().await {
            match res {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => tracing::debug!(%conn, "broadcast skipped closed peer"),
                Err(_) => {
                    self.metrics.broadcast_timeouts.inc(&[("kind", "broadcast")]);
                    tracing::warn!(%conn, "broadcast timed out; delivery deferred");
                    defer(conn, peer.tx, msg);
                }
            }
        }
        delivered
    }
}

/// Finish a timed-out delivery in the background once the peer's queue has
/// room. Frames carry versions, so one overtaken by a newer broadcast is
/// dropped by the replica. The task ends when the peer's queue closes.
fn defer(conn: ConnectionId, tx: mpsc::Sender<Bytes>, bytes: Bytes) {
    tokio::spawn(async move {
        match tx.send(bytes).await {
            Ok(()) => tracing::debug!(%conn, "deferred delivery completed"),
            Err(_) => tracing::debug!(%conn, "deferred delivery dropped; peer gone"),
        }
    });
}

/// Client-side path to the host. Clones share one sender; `close` drops it
/// for all of them so the host observes the disconnect.
#[derive(Clone)]
pub struct Uplink {
    tx: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl Uplink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        let tx = self
            .sender()
            .ok_or_else(|| HostSyncError::NotConnected("uplink closed".into()))?;
        tx.send(bytes)
            .await
            .map_err(|_| HostSyncError::NotConnected("uplink to host closed".into()))
    }

    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender().map_or(true, |tx| tx.is_closed())
    }
}
