//! Network transport contract.
//!
//! The transport is configured exactly once per activation from a relay
//! allocation, then started in the host or client role. Started transports
//! hand out [`Link`]s: ordered, bidirectional byte-frame queues to one peer.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::ConnectionId;

use crate::relay::RelayServerEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRole {
    Host,
    Client,
}

/// Everything the transport needs to reach the relay.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub role: TransportRole,
    pub endpoint: RelayServerEndpoint,
    pub allocation_id: String,
    pub local_connection_data: Bytes,
    pub remote_connection_data: Bytes,
    pub key: Bytes,
    pub require_secure_channel: bool,
}

/// One peer connection: frames out via `tx`, frames in via `rx`.
#[derive(Debug)]
pub struct Link {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<Bytes>,
    pub rx: mpsc::Receiver<Bytes>,
}

/// External network transport.
///
/// `configure` must run before `start_host`/`start_client`. Calling it a
/// second time without `teardown` is a caller error.
#[async_trait]
pub trait Transport: Send + Sync {
    fn configure(&self, cfg: TransportConfig) -> Result<()>;

    /// Drop the configuration and any listener so the transport can be
    /// configured again.
    fn teardown(&self);

    /// Start listening. Yields one `Link` per accepted client.
    async fn start_host(&self) -> Result<mpsc::Receiver<Link>>;

    /// Connect to the host. The returned link's id is `ConnectionId::HOST`.
    async fn start_client(&self) -> Result<Link>;
}

/// Process-wide transport configuration: written once, read-only afterwards.
#[derive(Debug, Default)]
pub struct TransportSlot {
    cfg: Mutex<Option<TransportConfig>>,
}

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the configuration. Fails if one is already present.
    pub fn set(&self, cfg: TransportConfig) -> Result<()> {
        let mut slot = self.cfg.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(HostSyncError::Internal(
                "transport already configured; teardown first".into(),
            ));
        }
        *slot = Some(cfg);
        Ok(())
    }

    pub fn get(&self) -> Option<TransportConfig> {
        self.cfg.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.cfg.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
