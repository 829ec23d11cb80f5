//! Per-session runtime context.
//!
//! `SessionContext` is built once when hosting or joining starts and handed
//! to every consumer (services, ops handlers). It owns the coordinator, the
//! replicated services, the dispatcher and the connection tasks, and tears
//! all of them down in `shutdown()`.

pub mod bootstrap;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::Instrument;

use hostsync_core::error::Result;
use hostsync_core::ids::{ConnectionId, PlayerId};
use hostsync_core::protocol::{decode_frame, Frame, FrameKind, Hello, SYS_CHANNEL};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, InboundCtx};
use crate::obs::SessionMetrics;
use crate::replication::{ChannelIdentity, Egress, Peer, PeerRegistry, Uplink};
use crate::services::{ReadyService, ThemeService};
use crate::session::{AuthService, SessionCoordinator, SessionQuery};
use crate::transport::{Link, Transport, TransportRole};

pub use bootstrap::{host_session, join_session, Backends};

#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("local", &self.inner.local)
            .field("role", &self.inner.role)
            .finish_non_exhaustive()
    }
}

struct ContextInner {
    cfg: Arc<SessionConfig>,
    local: PlayerId,
    role: TransportRole,
    coordinator: Arc<SessionCoordinator>,
    dispatcher: Dispatcher,
    theme: ThemeService,
    ready: Arc<ReadyService>,
    peers: Arc<PeerRegistry>,
    uplink: Option<Uplink>,
    transport: Arc<dyn Transport>,
    metrics: Arc<SessionMetrics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    host_lost: AtomicBool,
    shut_down: AtomicBool,
}

impl SessionContext {
    /// Host-side context. The local player owns every channel.
    pub fn host(
        cfg: Arc<SessionConfig>,
        local: PlayerId,
        coordinator: Arc<SessionCoordinator>,
        transport: Arc<dyn Transport>,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self> {
        let peers = Arc::new(PeerRegistry::new());
        let egress = Arc::new(Egress::new(
            peers.clone(),
            Duration::from_millis(cfg.replication.broadcast_timeout_ms),
            metrics.clone(),
        ));
        let identity = ChannelIdentity::new(local.clone(), local.clone());
        let resend = cfg.replication.resend_on_request;

        let theme = ThemeService::authority(
            identity.clone(),
            egress.clone(),
            cfg.themes.choices.clone(),
            resend,
            metrics.clone(),
        )?;
        let ready = Arc::new(ReadyService::authority(
            identity,
            egress,
            coordinator.clone(),
            resend,
            metrics.clone(),
        )?);

        Ok(Self::assemble(
            cfg,
            local,
            TransportRole::Host,
            coordinator,
            theme,
            ready,
            peers,
            None,
            transport,
            metrics,
        ))
    }

    /// Client-side context over an established link to the host.
    ///
    /// Binds the host connection, announces the local player and requests
    /// the initial value of every channel.
    pub async fn client(
        cfg: Arc<SessionConfig>,
        local: PlayerId,
        host: PlayerId,
        coordinator: Arc<SessionCoordinator>,
        transport: Arc<dyn Transport>,
        link: Link,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self> {
        let Link { id, tx, rx } = link;
        let uplink = Uplink::new(tx);
        let identity = ChannelIdentity::new(local.clone(), host.clone());

        let theme = ThemeService::replica(
            identity.clone(),
            uplink.clone(),
            cfg.themes.choices.clone(),
            metrics.clone(),
        );
        let ready = Arc::new(ReadyService::replica(
            identity,
            uplink.clone(),
            coordinator.clone(),
            metrics.clone(),
        ));

        let ctx = Self::assemble(
            cfg,
            local.clone(),
            TransportRole::Client,
            coordinator,
            theme,
            ready,
            Arc::new(PeerRegistry::new()),
            Some(uplink.clone()),
            transport,
            metrics,
        );

        ctx.inner.coordinator.register_connection(id, host);
        ctx.inner.metrics.connections_active.inc(&[]);
        ctx.spawn_reader(id, rx);

        let handshake = async {
            uplink.send(&Frame::hello(local)?).await?;
            ctx.inner.theme.channel().request_initialization().await?;
            ctx.inner.ready.board_channel().request_initialization().await
        }
        .await;
        if let Err(e) = handshake {
            tracing::warn!(error = %e, "handshake with host failed");
            ctx.shutdown();
            return Err(e);
        }
        Ok(ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        cfg: Arc<SessionConfig>,
        local: PlayerId,
        role: TransportRole,
        coordinator: Arc<SessionCoordinator>,
        theme: ThemeService,
        ready: Arc<ReadyService>,
        peers: Arc<PeerRegistry>,
        uplink: Option<Uplink>,
        transport: Arc<dyn Transport>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let dispatcher = Dispatcher::new();
        dispatcher.register(theme.channel());
        dispatcher.register(ready.clone());

        Self {
            inner: Arc::new(ContextInner {
                cfg,
                local,
                role,
                coordinator,
                dispatcher,
                theme,
                ready,
                peers,
                uplink,
                transport,
                metrics,
                tasks: Mutex::new(Vec::new()),
                host_lost: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.cfg
    }

    pub fn local_player_id(&self) -> &PlayerId {
        &self.inner.local
    }

    pub fn is_host(&self) -> bool {
        self.inner.role == TransportRole::Host
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.inner.coordinator
    }

    pub fn query<'a>(&'a self, auth: &'a dyn AuthService) -> SessionQuery<'a> {
        SessionQuery::new(&self.inner.coordinator, auth)
    }

    pub fn theme(&self) -> &ThemeService {
        &self.inner.theme
    }

    pub fn ready(&self) -> &ReadyService {
        &self.inner.ready
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.inner.metrics
    }

    /// Connected clients (host side).
    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    /// Client side: the link to the host has closed. Channels keep their
    /// last received values; further requests fail with `NotConnected`.
    pub fn host_lost(&self) -> bool {
        self.inner.host_lost.load(Ordering::Acquire)
    }

    /// Host: until shutdown. Client: while the link to the host is open.
    pub fn is_connected(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }
        match &self.inner.uplink {
            Some(uplink) => !uplink.is_closed() && !self.host_lost(),
            None => true,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Run the accept loop over the transport's incoming links.
    pub fn serve(&self, mut incoming: mpsc::Receiver<Link>) {
        let ctx = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(link) = incoming.recv().await {
                ctx.accept(link);
            }
            tracing::debug!("accept loop ended");
        });
        self.track(handle);
    }

    /// Adopt one client link: register its outbound queue and start reading.
    pub fn accept(&self, link: Link) {
        let Link { id, tx, rx } = link;
        self.inner.peers.insert(id, Peer { tx });
        self.inner.metrics.connections_active.inc(&[]);
        tracing::info!(conn = %id, "peer connected");
        self.spawn_reader(id, rx);
    }

    fn spawn_reader(&self, conn: ConnectionId, mut rx: mpsc::Receiver<Bytes>) {
        let ctx = self.clone();
        let span = tracing::info_span!("link", %conn, local = %self.inner.local);
        let handle = tokio::spawn(
            async move {
                if ctx.is_host() && !ctx.inner.cfg.replication.resend_on_request {
                    ctx.push_snapshots(conn).await;
                }
                while let Some(bytes) = rx.recv().await {
                    ctx.handle_inbound(conn, bytes).await;
                }
                ctx.link_closed(conn).await;
            }
            .instrument(span),
        );
        self.track(handle);
    }

    /// Seed a newly accepted peer with every set channel. Used when init
    /// requests are not answered with a resend.
    async fn push_snapshots(&self, conn: ConnectionId) {
        let pushes = [
            self.inner.theme.channel().push_current(conn).await,
            self.inner.ready.board_channel().push_current(conn).await,
        ];
        for res in pushes {
            if let Err(e) = res {
                tracing::debug!(error = %e, "initial push skipped");
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Decode and route one inbound frame. Errors are logged; they never
    /// end the reader loop.
    async fn handle_inbound(&self, conn: ConnectionId, bytes: Bytes) {
        let frame = match decode_frame(&bytes) {
            Ok(f) => f,
            Err(e) => {
                self.inner.metrics.decode_errors.inc(&[("code", e.code().as_str())]);
                tracing::warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        if frame.ch == SYS_CHANNEL {
            self.handle_sys(conn, &frame);
            return;
        }

        let ch = frame.ch.clone();
        let kind = frame.kind;
        if let Err(e) = self.inner.dispatcher.dispatch(InboundCtx { from: conn }, frame).await {
            if e.is_contract_violation() {
                // counted and logged where detected
                tracing::debug!(%ch, kind = kind.as_str(), code = e.code().as_str(), "frame rejected");
            } else {
                tracing::warn!(%ch, kind = kind.as_str(), error = %e, "frame handling failed");
            }
        }
    }

    fn handle_sys(&self, conn: ConnectionId, frame: &Frame) {
        match frame.kind {
            FrameKind::Hello if self.is_host() => match frame.data_as::<Hello>() {
                Ok(hello) => {
                    let listed = self
                        .inner
                        .coordinator
                        .descriptor()
                        .is_some_and(|d| d.player(&hello.player_id).is_some());
                    if !listed {
                        tracing::warn!(player = %hello.player_id, "hello from a player not on the roster");
                    }
                    self.inner.coordinator.register_connection(conn, hello.player_id);
                }
                Err(e) => tracing::warn!(error = %e, "malformed hello"),
            },
            kind => tracing::debug!(kind = kind.as_str(), "ignoring sys frame"),
        }
    }

    async fn link_closed(&self, conn: ConnectionId) {
        if self.is_shut_down() {
            return;
        }
        self.inner.metrics.connections_active.dec(&[]);
        let player = self.inner.coordinator.unregister_connection(conn);

        match self.inner.role {
            TransportRole::Host => {
                self.inner.peers.remove(conn);
                tracing::info!("peer disconnected");
                if let Some(player) = player {
                    if let Err(e) = self.inner.ready.remove_player(&player).await {
                        tracing::warn!(%player, error = %e, "failed to drop player from ready board");
                    }
                }
            }
            TransportRole::Client => {
                self.inner.host_lost.store(true, Ordering::Release);
                tracing::warn!("host connection lost; keeping last received values");
            }
        }
    }

    /// Tear the session down: close channels, drop peers and tasks, clear
    /// the coordinator and release the transport. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.theme.channel().close();
        self.inner.ready.board_channel().close();
        self.inner.dispatcher.clear();
        self.inner.peers.clear();
        if let Some(uplink) = &self.inner.uplink {
            uplink.close();
        }

        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for t in tasks {
            t.abort();
        }

        self.inner.coordinator.reset();
        self.inner.transport.teardown();
        self.inner.metrics.set_shut_down();
        tracing::info!(local = %self.inner.local, "session shut down");
    }
}
