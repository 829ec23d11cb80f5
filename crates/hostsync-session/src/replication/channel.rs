use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::ConnectionId;
use hostsync_core::protocol::{Frame, FrameKind};

use crate::dispatch::{ChannelHandler, InboundCtx};
use crate::obs::SessionMetrics;

use super::{ChannelIdentity, ChannelState, Egress, Snapshot, Subscription, Uplink, ValueChange};

/// Bounds for a value that can ride a state channel.
pub trait Replicable:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Replicable for T where
    T: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Produces the first value when the authority initializes an unset channel.
pub type Initializer<T> = Arc<dyn Fn() -> T + Send + Sync>;

enum Role<T> {
    Authority {
        egress: Arc<Egress>,
        initializer: Initializer<T>,
        resend_on_request: bool,
    },
    Replica {
        uplink: Uplink,
        init_requested: AtomicBool,
    },
}

struct Inner<T> {
    value: Option<T>,
    version: u64,
    watchers: Vec<(u64, mpsc::UnboundedSender<ValueChange<T>>)>,
    closed: bool,
}

impl<T: Clone> Inner<T> {
    /// Apply one change and fan it out to local watchers in the same critical
    /// section, so watchers observe changes in commit order.
    fn commit(&mut self, next: T, version: u64) {
        let previous = self.value.replace(next.clone());
        self.version = version;
        let change = ValueChange {
            previous,
            current: next,
            version,
        };
        self.watchers.retain(|(_, tx)| tx.send(change.clone()).is_ok());
    }
}

enum InitOutcome {
    Broadcast(Bytes, u64),
    Resend(Bytes),
    Nothing,
}

/// Single-writer replicated value.
///
/// Authority commits are serialized by `write_gate`, which stays held while
/// the new version is pushed to every peer queue; peers therefore receive
/// versions in commit order. `inner` is only locked for short, await-free
/// sections.
pub struct StateChannel<T: Replicable> {
    name: String,
    identity: ChannelIdentity,
    role: Role<T>,
    inner: Mutex<Inner<T>>,
    write_gate: tokio::sync::Mutex<()>,
    next_watcher: AtomicU64,
    metrics: Arc<SessionMetrics>,
}

impl<T: Replicable> StateChannel<T> {
    /// Authority-side channel. Fails unless `identity.local` is the authority.
    pub fn authority(
        name: impl Into<String>,
        identity: ChannelIdentity,
        egress: Arc<Egress>,
        initializer: Initializer<T>,
        resend_on_request: bool,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self> {
        let name = name.into();
        if !identity.is_local_authority() {
            return Err(HostSyncError::AuthorityViolation(format!(
                "{} cannot own channel {name}; authority is {}",
                identity.local, identity.authority
            )));
        }
        let role = Role::Authority {
            egress,
            initializer,
            resend_on_request,
        };
        Ok(Self::build(name, identity, role, metrics))
    }

    /// Replica-side channel holding the last value received from the host.
    pub fn replica(
        name: impl Into<String>,
        identity: ChannelIdentity,
        uplink: Uplink,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let role = Role::Replica {
            uplink,
            init_requested: AtomicBool::new(false),
        };
        Self::build(name.into(), identity, role, metrics)
    }

    fn build(name: String, identity: ChannelIdentity, role: Role<T>, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            name,
            identity,
            role,
            inner: Mutex::new(Inner {
                value: None,
                version: 0,
                watchers: Vec::new(),
                closed: false,
            }),
            write_gate: tokio::sync::Mutex::new(()),
            next_watcher: AtomicU64::new(1),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    pub fn is_authority(&self) -> bool {
        matches!(self.role, Role::Authority { .. }) && self.identity.is_local_authority()
    }

    pub fn state(&self) -> ChannelState {
        if self.lock().value.is_some() {
            ChannelState::Set
        } else {
            ChannelState::Unset
        }
    }

    pub fn value(&self) -> Option<T> {
        self.lock().value.clone()
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        let inner = self.lock();
        Snapshot {
            value: inner.value.clone(),
            version: inner.version,
        }
    }

    /// Register a watcher. Every change applied after this call is delivered
    /// exactly once, in application order.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        if !inner.closed {
            inner.watchers.push((id, tx));
        }
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.watchers.len();
        inner.watchers.retain(|(wid, _)| *wid != id);
        inner.watchers.len() != before
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Detach every watcher and refuse further changes.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.watchers.clear();
    }

    /// Ask for the value to be initialized.
    ///
    /// On a replica this sends at most one `init_req` per connection
    /// lifetime; repeated calls are local no-ops. On the authority it runs
    /// the initializer if the channel is still unset.
    pub async fn request_initialization(&self) -> Result<()> {
        match &self.role {
            Role::Authority { .. } => self.initialize_if_unset(None).await,
            Role::Replica {
                uplink,
                init_requested,
            } => {
                if init_requested.swap(true, Ordering::AcqRel) {
                    tracing::debug!(channel = %self.name, "initialization already requested");
                    return Ok(());
                }
                let frame = Frame::new(self.name.as_str(), FrameKind::InitReq);
                if let Err(e) = uplink.send(&frame).await {
                    init_requested.store(false, Ordering::Release);
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Re-arm `request_initialization` after a reconnect.
    pub fn reset_connection(&self) {
        if let Role::Replica { init_requested, .. } = &self.role {
            init_requested.store(false, Ordering::Release);
        }
    }

    /// Authority-only direct write followed by a broadcast.
    ///
    /// Writing a value equal to the current one is a no-op: the version is
    /// not bumped, watchers are not notified and nothing is broadcast.
    pub async fn set_value(&self, value: T) -> Result<()> {
        self.ensure_authority("set_value")?;
        self.commit_with(move |_| value).await
    }

    /// Authority-only read-modify-write.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Option<&T>) -> T + Send,
    {
        self.ensure_authority("update")?;
        self.commit_with(f).await
    }

    async fn commit_with<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Option<&T>) -> T + Send,
    {
        let Role::Authority { egress, .. } = &self.role else {
            return Err(self.violation("local", format!("replica cannot commit {}", self.name)));
        };

        let _gate = self.write_gate.lock().await;
        let (bytes, version) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(HostSyncError::NotConnected(format!("channel {} is closed", self.name)));
            }
            let next = f(inner.value.as_ref());
            if inner.value.as_ref() == Some(&next) {
                tracing::debug!(channel = %self.name, "value unchanged; nothing to broadcast");
                return Ok(());
            }
            let version = inner.version + 1;
            let bytes = value_frame(&self.name, version, &next)?;
            let from = if inner.value.is_some() { "set" } else { "unset" };
            inner.commit(next, version);
            self.metrics
                .channel_transitions
                .inc(&[("channel", self.name.as_str()), ("from", from)]);
            (bytes, version)
        };

        let delivered = egress.broadcast(bytes).await;
        tracing::info!(channel = %self.name, version, delivered, "value committed");
        Ok(())
    }

    /// Authority-only: unicast the current value to one peer. Does nothing
    /// while the channel is unset. Serialized with commits, so the peer never
    /// sees this snapshot after a newer broadcast it already received.
    pub async fn push_current(&self, conn: ConnectionId) -> Result<()> {
        let Role::Authority { egress, .. } = &self.role else {
            return Err(self.violation("local", format!("replica cannot push {}", self.name)));
        };

        let _gate = self.write_gate.lock().await;
        let bytes = {
            let inner = self.lock();
            if inner.closed {
                return Err(HostSyncError::NotConnected(format!("channel {} is closed", self.name)));
            }
            match inner.value.as_ref() {
                Some(current) => value_frame(&self.name, inner.version, current)?,
                None => return Ok(()),
            }
        };
        egress.send_to(conn, bytes).await?;
        tracing::debug!(channel = %self.name, %conn, "pushed current value");
        Ok(())
    }

    /// Check-and-set performed entirely on the authority: at most one
    /// request ever observes the channel unset.
    async fn initialize_if_unset(&self, requester: Option<ConnectionId>) -> Result<()> {
        let Role::Authority {
            egress,
            initializer,
            resend_on_request,
        } = &self.role
        else {
            return Err(self.violation("local", format!("replica cannot initialize {}", self.name)));
        };

        let _gate = self.write_gate.lock().await;
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(HostSyncError::NotConnected(format!("channel {} is closed", self.name)));
            }
            if inner.value.is_none() {
                let value = initializer();
                let version = inner.version + 1;
                let bytes = value_frame(&self.name, version, &value)?;
                inner.commit(value, version);
                self.metrics
                    .channel_transitions
                    .inc(&[("channel", self.name.as_str()), ("from", "unset")]);
                InitOutcome::Broadcast(bytes, version)
            } else if *resend_on_request && requester.is_some() {
                match inner.value.as_ref() {
                    Some(current) => InitOutcome::Resend(value_frame(&self.name, inner.version, current)?),
                    None => InitOutcome::Nothing,
                }
            } else {
                InitOutcome::Nothing
            }
        };

        match outcome {
            InitOutcome::Broadcast(bytes, version) => {
                let delivered = egress.broadcast(bytes).await;
                tracing::info!(channel = %self.name, version, delivered, ?requester, "channel initialized");
            }
            InitOutcome::Resend(bytes) => {
                if let Some(conn) = requester {
                    if let Err(e) = egress.send_to(conn, bytes).await {
                        tracing::debug!(channel = %self.name, %conn, error = %e, "resend failed");
                    }
                }
            }
            InitOutcome::Nothing => {}
        }
        Ok(())
    }

    /// Apply a value frame received from the authority. Versions at or below
    /// the current one are duplicates or stale and are dropped.
    fn apply_remote(&self, frame: &Frame) -> Result<()> {
        let version = frame.version.ok_or_else(|| {
            HostSyncError::BadRequest(format!("{}/value requires a version", self.name))
        })?;
        let value: T = frame.data_as()?;

        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }
        if version <= inner.version {
            tracing::debug!(channel = %self.name, version, current = inner.version, "ignoring stale value");
            return Ok(());
        }
        inner.commit(value, version);
        tracing::debug!(channel = %self.name, version, "replica applied value");
        Ok(())
    }

    fn ensure_authority(&self, op: &str) -> Result<()> {
        if self.is_authority() {
            return Ok(());
        }
        Err(self.violation(
            "local",
            format!(
                "{} attempted {op} on {} owned by {}",
                self.identity.local, self.name, self.identity.authority
            ),
        ))
    }

    fn violation(&self, origin: &str, msg: String) -> HostSyncError {
        self.metrics
            .authority_violations
            .inc(&[("channel", self.name.as_str()), ("origin", origin)]);
        tracing::warn!(channel = %self.name, %origin, "{msg}");
        HostSyncError::AuthorityViolation(msg)
    }
}

fn value_frame<T: Serialize>(channel: &str, version: u64, value: &T) -> Result<Bytes> {
    Frame::new(channel, FrameKind::Value)
        .with_version(version)
        .with_data(value)?
        .encode()
}

#[async_trait]
impl<T: Replicable> ChannelHandler for StateChannel<T> {
    fn channel(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: InboundCtx, frame: Frame) -> Result<()> {
        match (&self.role, frame.kind) {
            (Role::Authority { .. }, FrameKind::InitReq) => self.initialize_if_unset(Some(ctx.from)).await,
            (Role::Replica { .. }, FrameKind::Value) => self.apply_remote(&frame),
            (Role::Authority { .. }, FrameKind::Value) => Err(self.violation(
                "remote",
                format!("{} tried to write {}", ctx.from, self.name),
            )),
            (_, kind) => Err(HostSyncError::BadRequest(format!(
                "channel {} does not accept {}",
                self.name,
                kind.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::future::join_all;
    use hostsync_core::ids::PlayerId;
    use hostsync_core::protocol::decode_frame;
    use tokio::time::Duration;

    use super::*;
    use crate::replication::{Peer, PeerRegistry};

    fn metrics() -> Arc<SessionMetrics> {
        Arc::new(SessionMetrics::default())
    }

    fn host_identity() -> ChannelIdentity {
        ChannelIdentity::new(PlayerId::from("host"), PlayerId::from("host"))
    }

    fn guest_identity() -> ChannelIdentity {
        ChannelIdentity::new(PlayerId::from("guest"), PlayerId::from("host"))
    }

    /// Authority channel with `peers` connected peers; returns their inbound queues.
    fn authority_with_peers(
        peers: u64,
        initializer: Initializer<String>,
    ) -> (StateChannel<String>, Vec<mpsc::Receiver<Bytes>>) {
        let registry = Arc::new(PeerRegistry::new());
        let mut queues = Vec::new();
        for id in 1..=peers {
            let (tx, rx) = mpsc::channel(64);
            registry.insert(ConnectionId(id), Peer { tx });
            queues.push(rx);
        }
        let egress = Arc::new(Egress::new(registry, Duration::from_millis(500), metrics()));
        let channel = StateChannel::authority("theme", host_identity(), egress, initializer, true, metrics())
            .expect("local player is authority");
        (channel, queues)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(decode_frame(&b).expect("valid frame"));
        }
        out
    }

    #[tokio::test]
    async fn authority_set_notifies_self_and_peers_once() {
        let (ch, mut queues) = authority_with_peers(2, Arc::new(|| "Formal".to_string()));
        let mut sub = ch.subscribe();

        ch.set_value("Streetwear".to_string()).await.unwrap();

        let change = sub.try_recv().expect("one change");
        assert_eq!(change.previous, None);
        assert_eq!(change.current, "Streetwear");
        assert_eq!(change.version, 1);
        assert!(sub.try_recv().is_none());

        for q in &mut queues {
            let frames = drain(q);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].version, Some(1));
            assert_eq!(frames[0].data_as::<String>().unwrap(), "Streetwear");
        }
    }

    #[tokio::test]
    async fn concurrent_init_requests_commit_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (ch, mut queues) = authority_with_peers(
            4,
            Arc::new(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                format!("theme-{n}")
            }),
        );

        let requests = (1..=4).map(|id| {
            ch.handle(
                InboundCtx { from: ConnectionId(id) },
                Frame::new("theme", FrameKind::InitReq),
            )
        });
        for res in join_all(requests).await {
            res.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ch.snapshot(), Snapshot { value: Some("theme-0".to_string()), version: 1 });

        // every peer saw the single broadcast; later requesters also got a resend of the same value
        for q in &mut queues {
            let frames = drain(q);
            assert!(!frames.is_empty());
            for f in frames {
                assert_eq!(f.version, Some(1));
                assert_eq!(f.data_as::<String>().unwrap(), "theme-0");
            }
        }
    }

    #[tokio::test]
    async fn replica_write_is_rejected() {
        let (tx, mut rx) = mpsc::channel(8);
        let m = metrics();
        let ch: StateChannel<String> = StateChannel::replica("theme", guest_identity(), Uplink::new(tx), m.clone());

        let err = ch.set_value("Y2K".into()).await.unwrap_err();
        assert_eq!(err.code().as_str(), "AUTHORITY_VIOLATION");
        assert_eq!(ch.state(), ChannelState::Unset);
        assert!(rx.try_recv().is_err());
        assert_eq!(m.authority_violations.get(&[("channel", "theme"), ("origin", "local")]), 1);
    }

    #[test]
    fn authority_constructor_checks_identity() {
        let registry = Arc::new(PeerRegistry::new());
        let egress = Arc::new(Egress::new(registry, Duration::from_millis(100), metrics()));
        let res = StateChannel::<String>::authority(
            "theme",
            guest_identity(),
            egress,
            Arc::new(String::new),
            true,
            metrics(),
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn replica_requests_initialization_once_per_connection() {
        let (tx, mut rx) = mpsc::channel(8);
        let ch: StateChannel<String> = StateChannel::replica("theme", guest_identity(), Uplink::new(tx), metrics());

        ch.request_initialization().await.unwrap();
        ch.request_initialization().await.unwrap();
        assert_eq!(drain(&mut rx).len(), 1);

        ch.reset_connection();
        ch.request_initialization().await.unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::InitReq);
    }

    #[tokio::test]
    async fn replica_drops_stale_and_duplicate_versions() {
        let (tx, _rx) = mpsc::channel(8);
        let ch: StateChannel<String> = StateChannel::replica("theme", guest_identity(), Uplink::new(tx), metrics());
        let mut sub = ch.subscribe();
        let ctx = InboundCtx { from: ConnectionId::HOST };
        let value = |v: u64, s: &str| {
            Frame::new("theme", FrameKind::Value).with_version(v).with_data(s).unwrap()
        };

        ch.handle(ctx, value(2, "Vintage")).await.unwrap();
        ch.handle(ctx, value(2, "Vintage")).await.unwrap();
        ch.handle(ctx, value(1, "Formal")).await.unwrap();
        ch.handle(ctx, value(3, "Sporty")).await.unwrap();

        let first = sub.try_recv().unwrap();
        assert_eq!((first.previous, first.current.as_str()), (None, "Vintage"));
        let second = sub.try_recv().unwrap();
        assert_eq!(second.previous.as_deref(), Some("Vintage"));
        assert_eq!(second.current, "Sporty");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn remote_value_at_authority_is_a_violation() {
        let (ch, _queues) = authority_with_peers(1, Arc::new(|| "Formal".to_string()));
        let frame = Frame::new("theme", FrameKind::Value).with_version(9).with_data("Hijack").unwrap();

        let err = ch.handle(InboundCtx { from: ConnectionId(1) }, frame).await.unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(ch.state(), ChannelState::Unset);
    }

    #[tokio::test]
    async fn close_detaches_watchers() {
        let (ch, _queues) = authority_with_peers(0, Arc::new(|| "Formal".to_string()));
        let mut sub = ch.subscribe();
        let other = ch.subscribe();
        assert!(ch.unsubscribe(other.id()));
        assert_eq!(ch.watcher_count(), 1);

        ch.close();
        assert_eq!(sub.recv().await, None);
        assert!(ch.set_value("Y2K".into()).await.is_err());
    }

    #[tokio::test]
    async fn broadcast_to_a_full_queue_is_delivered_once_it_drains() {
        let m = metrics();
        let registry = Arc::new(PeerRegistry::new());
        let (peer_tx, mut peer_rx) = mpsc::channel(1);
        peer_tx.try_send(Bytes::from_static(b"backlog")).unwrap();
        registry.insert(ConnectionId(1), Peer { tx: peer_tx });
        let egress = Arc::new(Egress::new(registry, Duration::from_millis(50), m.clone()));
        let host = StateChannel::authority(
            "theme",
            host_identity(),
            egress,
            Arc::new(|| "Formal".to_string()),
            true,
            m.clone(),
        )
        .unwrap();

        let (up_tx, mut up_rx) = mpsc::channel(8);
        let replica: StateChannel<String> =
            StateChannel::replica("theme", guest_identity(), Uplink::new(up_tx), metrics());

        replica.request_initialization().await.unwrap();
        let init_req = drain(&mut up_rx).pop().expect("init_req sent");
        host.handle(InboundCtx { from: ConnectionId(1) }, init_req).await.unwrap();
        assert_eq!(host.value().as_deref(), Some("Formal"));
        assert_eq!(m.broadcast_timeouts.get(&[("kind", "broadcast")]), 1);

        // the replica will not ask again on this connection
        replica.request_initialization().await.unwrap();
        assert!(drain(&mut up_rx).is_empty());

        assert_eq!(peer_rx.recv().await.as_deref(), Some(&b"backlog"[..]));
        let late = tokio::time::timeout(Duration::from_secs(1), peer_rx.recv())
            .await
            .expect("timed-out frame is delivered after the queue drains")
            .expect("queue open");
        replica
            .handle(InboundCtx { from: ConnectionId::HOST }, decode_frame(&late).unwrap())
            .await
            .unwrap();

        assert_eq!(replica.value().as_deref(), Some("Formal"));
        assert_eq!(replica.snapshot(), host.snapshot());
    }

    #[tokio::test]
    async fn push_current_reaches_one_peer_only_once_set() {
        let (ch, mut queues) = authority_with_peers(2, Arc::new(|| "Formal".to_string()));

        ch.push_current(ConnectionId(1)).await.unwrap();
        assert!(drain(&mut queues[0]).is_empty());

        ch.set_value("Y2K".into()).await.unwrap();
        for q in &mut queues {
            drain(q);
        }

        ch.push_current(ConnectionId(2)).await.unwrap();
        assert!(drain(&mut queues[0]).is_empty());
        let frames = drain(&mut queues[1]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].version, Some(1));
        assert_eq!(frames[0].data_as::<String>().unwrap(), "Y2K");
        assert_eq!(ch.snapshot().version, 1);

        let err = ch.push_current(ConnectionId(9)).await.unwrap_err();
        assert_eq!(err.code().as_str(), "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn writing_the_current_value_is_a_no_op() {
        let (ch, mut queues) = authority_with_peers(1, Arc::new(|| "Formal".to_string()));
        ch.set_value("Vintage".into()).await.unwrap();
        drain(&mut queues[0]);
        let mut sub = ch.subscribe();

        ch.set_value("Vintage".into()).await.unwrap();

        assert_eq!(ch.snapshot().version, 1);
        assert!(sub.try_recv().is_none());
        assert!(drain(&mut queues[0]).is_empty());
    }
}
