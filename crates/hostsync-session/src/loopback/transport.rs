use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::ConnectionId;

use crate::transport::{Link, Transport, TransportConfig, TransportRole, TransportSlot};

const ACCEPT_BACKLOG: usize = 16;

struct Listener {
    accept: mpsc::Sender<Link>,
    next_id: AtomicU64,
}

/// Shared "network": hosts listen under their relay connection data and
/// clients dial the host data their allocation carries.
#[derive(Default)]
pub struct LoopbackHub {
    listeners: DashMap<Bytes, Listener>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// In-process `Transport` backed by bounded mpsc queues.
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    slot: TransportSlot,
    queue: usize,
    listening: Mutex<Option<Bytes>>,
}

impl LoopbackTransport {
    /// `queue` bounds each direction of every link.
    pub fn new(hub: Arc<LoopbackHub>, queue: usize) -> Self {
        Self {
            hub,
            slot: TransportSlot::new(),
            queue: queue.max(1),
            listening: Mutex::new(None),
        }
    }

    /// The configuration applied by the last `configure`, if any.
    pub fn configured(&self) -> Option<TransportConfig> {
        self.slot.get()
    }

    fn require(&self, role: TransportRole) -> Result<TransportConfig> {
        let cfg = self
            .slot
            .get()
            .ok_or_else(|| HostSyncError::NotConnected("transport not configured".into()))?;
        if cfg.role != role {
            return Err(HostSyncError::BadRequest(format!(
                "transport configured as {:?}, started as {role:?}",
                cfg.role
            )));
        }
        Ok(cfg)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn configure(&self, cfg: TransportConfig) -> Result<()> {
        if cfg.require_secure_channel && !(cfg.endpoint.secure && cfg.endpoint.connection_type.is_secure()) {
            return Err(HostSyncError::BadRequest(format!(
                "endpoint {}:{} ({}) is not secure",
                cfg.endpoint.host,
                cfg.endpoint.port,
                cfg.endpoint.connection_type.as_str()
            )));
        }
        tracing::debug!(
            role = ?cfg.role,
            allocation = %cfg.allocation_id,
            endpoint = %cfg.endpoint.connection_type.as_str(),
            "transport configured"
        );
        self.slot.set(cfg)
    }

    fn teardown(&self) {
        let listening = self.listening.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(key) = listening {
            self.hub.listeners.remove(&key);
        }
        self.slot.clear();
    }

    async fn start_host(&self) -> Result<mpsc::Receiver<Link>> {
        let cfg = self.require(TransportRole::Host)?;
        let (accept, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        self.hub.listeners.insert(
            cfg.local_connection_data.clone(),
            Listener {
                accept,
                next_id: AtomicU64::new(1),
            },
        );
        *self.listening.lock().unwrap_or_else(PoisonError::into_inner) = Some(cfg.local_connection_data);
        Ok(incoming)
    }

    async fn start_client(&self) -> Result<Link> {
        let cfg = self.require(TransportRole::Client)?;
        let (accept, id) = {
            let listener = self
                .hub
                .listeners
                .get(&cfg.remote_connection_data)
                .ok_or_else(|| HostSyncError::NotConnected("no host listening for this allocation".into()))?;
            let id = ConnectionId(listener.next_id.fetch_add(1, Ordering::Relaxed));
            (listener.accept.clone(), id)
        };

        let (to_host, from_client) = mpsc::channel(self.queue);
        let (to_client, from_host) = mpsc::channel(self.queue);
        accept
            .send(Link {
                id,
                tx: to_client,
                rx: from_client,
            })
            .await
            .map_err(|_| HostSyncError::NotConnected("host stopped accepting".into()))?;

        Ok(Link {
            id: ConnectionId::HOST,
            tx: to_host,
            rx: from_host,
        })
    }
}
