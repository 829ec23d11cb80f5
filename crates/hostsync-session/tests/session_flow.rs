#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{sleep, timeout, Duration};

use hostsync_core::ids::{ConnectionId, PlayerId};
use hostsync_core::protocol::{Frame, FrameKind};
use hostsync_session::config::SessionConfig;
use hostsync_session::context::{host_session, join_session, Backends, SessionContext};
use hostsync_session::loopback::{InMemoryLobby, InMemoryRelay, LoopbackHub, LoopbackTransport, StaticAuth};
use hostsync_session::relay::ConnectionType;
use hostsync_session::replication::Subscription;
use hostsync_session::session::{PlayerRef, SessionDescriptor};
use hostsync_session::transport::{Transport, TransportConfig, TransportRole};

const LOBBY: &str = "lobby-1";

struct Harness {
    cfg: Arc<SessionConfig>,
    relay: Arc<InMemoryRelay>,
    lobby: Arc<InMemoryLobby>,
    hub: Arc<LoopbackHub>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    fn with_config(cfg: SessionConfig) -> Self {
        let lobby = Arc::new(InMemoryLobby::new());
        lobby.put(SessionDescriptor::new(
            LOBBY,
            vec![
                PlayerRef::new("hana", "Hana"),
                PlayerRef::new("kai", "Kai"),
                PlayerRef::new("zoe", "Zoe"),
            ],
        ));
        Self {
            cfg: Arc::new(cfg),
            relay: Arc::new(InMemoryRelay::new(4)),
            lobby,
            hub: Arc::new(LoopbackHub::new()),
        }
    }

    fn backends(&self, auth: StaticAuth) -> (Backends, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new(self.hub.clone(), 64));
        let backends = Backends {
            relay: self.relay.clone(),
            lobby: self.lobby.clone(),
            auth: Arc::new(auth),
            transport: transport.clone(),
        };
        (backends, transport)
    }

    async fn host(&self, player: &str) -> SessionContext {
        let (b, _) = self.backends(StaticAuth::signed_in(player));
        host_session(self.cfg.clone(), &b, LOBBY).await.expect("host")
    }

    async fn join(&self, player: &str) -> SessionContext {
        let (b, _) = self.backends(StaticAuth::signed_in(player));
        join_session(self.cfg.clone(), &b, LOBBY).await.expect("join")
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn next_change(sub: &mut Subscription<String>) -> String {
    timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("change within 2s")
        .expect("channel open")
        .current
}

fn other_theme(ctx: &SessionContext) -> String {
    let current = ctx.theme().current();
    ctx.theme()
        .choices()
        .iter()
        .find(|c| Some(*c) != current.as_ref())
        .cloned()
        .unwrap()
}

async fn converged(host: &SessionContext, clients: &[&SessionContext]) {
    eventually("clients receive the host theme", || {
        let want = host.theme().current();
        want.is_some() && clients.iter().all(|c| c.theme().current() == want)
    })
    .await;
}

#[tokio::test]
async fn clients_converge_on_one_host_pick() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    let zoe = h.join("zoe").await;

    converged(&host, &[&kai, &zoe]).await;

    // two init requests, one commit
    assert_eq!(host.theme().channel().snapshot().version, 1);
    assert!(host.theme().choices().contains(&host.theme().current().unwrap()));
    assert_eq!(host.peer_count(), 2);
}

#[tokio::test]
async fn host_write_reaches_every_holder_once() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    let zoe = h.join("zoe").await;
    converged(&host, &[&kai, &zoe]).await;

    // the random pick may already be Streetwear; move off it first
    if host.theme().current().as_deref() == Some("Streetwear") {
        host.theme().select("Formal").await.unwrap();
        eventually("clients leave Streetwear", || {
            [&kai, &zoe].iter().all(|c| c.theme().current().as_deref() == Some("Formal"))
        })
        .await;
    }
    let version = host.theme().channel().snapshot().version;

    let mut subs = [host.theme().subscribe(), kai.theme().subscribe(), zoe.theme().subscribe()];
    host.theme().channel().set_value("Streetwear".to_string()).await.unwrap();

    for sub in subs.iter_mut() {
        assert_eq!(next_change(sub).await, "Streetwear");
    }
    sleep(Duration::from_millis(50)).await;
    for sub in subs.iter_mut() {
        assert!(sub.try_recv().is_none());
    }
    assert_eq!(zoe.theme().channel().snapshot().version, version + 1);
}

#[tokio::test]
async fn late_joiner_gets_current_value_without_a_new_commit() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    converged(&host, &[&kai]).await;

    let pick = other_theme(&host);
    host.theme().select(&pick).await.unwrap();
    eventually("kai sees the reselection", || kai.theme().current().as_ref() == Some(&pick)).await;

    let before = host.theme().channel().snapshot();
    let mut kai_sub = kai.theme().subscribe();

    let zoe = h.join("zoe").await;
    eventually("zoe receives the current theme", || zoe.theme().current().as_ref() == Some(&pick)).await;

    assert_eq!(host.theme().channel().snapshot(), before);
    assert_eq!(zoe.theme().channel().snapshot().version, before.version);
    sleep(Duration::from_millis(50)).await;
    assert!(kai_sub.try_recv().is_none());
}

#[tokio::test]
async fn late_joiner_is_seeded_when_requests_are_not_answered() {
    let mut cfg = SessionConfig::default();
    cfg.replication.resend_on_request = false;
    let h = Harness::with_config(cfg);
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    converged(&host, &[&kai]).await;

    host.theme().channel().set_value("Streetwear".to_string()).await.unwrap();
    eventually("kai sees Streetwear", || kai.theme().current().as_deref() == Some("Streetwear")).await;
    let before = host.theme().channel().snapshot();

    let zoe = h.join("zoe").await;
    eventually("zoe receives the current theme", || {
        zoe.theme().current().as_deref() == Some("Streetwear")
    })
    .await;
    eventually("zoe receives the ready board", || zoe.ready().board() == host.ready().board()).await;

    assert_eq!(host.theme().channel().snapshot(), before);
    assert_eq!(zoe.theme().channel().snapshot().version, before.version);
}

#[tokio::test]
async fn replica_writes_are_rejected_locally() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    converged(&host, &[&kai]).await;
    let before = host.theme().channel().snapshot();

    let pick = other_theme(&kai);
    let err = kai.theme().select(&pick).await.unwrap_err();
    assert_eq!(err.code().as_str(), "AUTHORITY_VIOLATION");
    assert_eq!(
        kai.metrics()
            .authority_violations
            .get(&[("channel", "theme"), ("origin", "local")]),
        1
    );

    sleep(Duration::from_millis(50)).await;
    assert_eq!(host.theme().channel().snapshot(), before);
    assert_eq!(kai.theme().channel().snapshot(), before);
}

#[tokio::test]
async fn ready_proposals_are_attributed_by_connection() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    let zoe = h.join("zoe").await;

    kai.ready().set_ready(true).await.unwrap();
    let kai_id = PlayerId::from("kai");
    eventually("host records kai as ready", || host.ready().is_ready(&kai_id)).await;
    eventually("zoe sees kai as ready", || zoe.ready().is_ready(&kai_id)).await;
    assert!(!host.ready().all_ready());

    zoe.ready().set_ready(true).await.unwrap();
    host.ready().set_ready(true).await.unwrap();
    eventually("everyone ready", || kai.ready().all_ready()).await;
}

#[tokio::test]
async fn disconnect_unbinds_identity_and_ready_entry() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    let zoe = h.join("zoe").await;

    kai.ready().set_ready(true).await.unwrap();
    let kai_id = PlayerId::from("kai");
    eventually("kai ready on host", || host.ready().is_ready(&kai_id)).await;
    assert!(host.coordinator().lookup_connection_id(&kai_id).is_some());

    kai.shutdown();

    eventually("kai unbound", || host.coordinator().lookup_connection_id(&kai_id).is_none()).await;
    eventually("kai dropped from board", || !host.ready().board().contains_key(&kai_id)).await;
    eventually("zoe sees the smaller board", || !zoe.ready().board().contains_key(&kai_id)).await;
    assert_eq!(host.peer_count(), 1);
}

#[tokio::test]
async fn host_loss_keeps_last_value_and_refuses_new_requests() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    converged(&host, &[&kai]).await;
    let last = kai.theme().current();

    host.shutdown();
    assert!(host.is_shut_down());
    eventually("kai notices the host is gone", || kai.host_lost()).await;
    assert!(!kai.is_connected());
    assert_eq!(kai.theme().current(), last);

    let mut refused = None;
    for _ in 0..200 {
        if let Err(e) = kai.ready().set_ready(true).await {
            refused = Some(e);
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(refused.expect("request refused").code().as_str(), "NOT_CONNECTED");
}

#[tokio::test]
async fn both_roles_configure_the_secure_endpoint() {
    let h = Harness::new();
    let (host_backends, host_transport) = h.backends(StaticAuth::signed_in("hana"));
    let _host = host_session(h.cfg.clone(), &host_backends, LOBBY).await.unwrap();
    let (kai_backends, kai_transport) = h.backends(StaticAuth::signed_in("kai"));
    let _kai = join_session(h.cfg.clone(), &kai_backends, LOBBY).await.unwrap();

    let host_cfg = host_transport.configured().unwrap();
    let kai_cfg = kai_transport.configured().unwrap();
    for cfg in [&host_cfg, &kai_cfg] {
        assert_eq!(cfg.endpoint.connection_type, ConnectionType::Dtls);
        assert!(cfg.endpoint.secure);
        assert!(cfg.require_secure_channel);
    }
    assert_eq!(host_cfg.role, TransportRole::Host);
    assert_eq!(host_cfg.local_connection_data, host_cfg.remote_connection_data);
    assert_eq!(kai_cfg.role, TransportRole::Client);
    assert_eq!(kai_cfg.remote_connection_data, host_cfg.local_connection_data);
}

#[tokio::test]
async fn bad_frames_and_unbound_senders_do_not_break_the_link() {
    let h = Harness::new();
    let (host_backends, host_transport) = h.backends(StaticAuth::signed_in("hana"));
    let host = host_session(h.cfg.clone(), &host_backends, LOBBY).await.unwrap();
    let host_cfg = host_transport.configured().unwrap();

    // raw client that skips the hello
    let raw = LoopbackTransport::new(h.hub.clone(), 8);
    raw.configure(TransportConfig {
        role: TransportRole::Client,
        remote_connection_data: host_cfg.local_connection_data.clone(),
        local_connection_data: Bytes::from_static(b"raw"),
        ..host_cfg
    })
    .unwrap();
    let link = raw.start_client().await.unwrap();

    let propose = Frame::new("ready", FrameKind::Propose)
        .with_data(&serde_json::json!({ "ready": true }))
        .unwrap()
        .encode()
        .unwrap();
    link.tx.send(Bytes::from_static(b"{not json")).await.unwrap();
    link.tx.send(propose.clone()).await.unwrap();

    eventually("unbound proposal counted", || host.metrics().unresolved_identities.get(&[]) == 1).await;
    assert_eq!(host.metrics().decode_errors.get(&[("code", "BAD_REQUEST")]), 1);
    assert!(host.ready().board_channel().value().is_none());

    // same link, now identified
    link.tx
        .send(Frame::hello(PlayerId::from("zoe")).unwrap().encode().unwrap())
        .await
        .unwrap();
    link.tx.send(propose).await.unwrap();
    let zoe = PlayerId::from("zoe");
    eventually("identified proposal applied", || host.ready().is_ready(&zoe)).await;
    assert_eq!(host.coordinator().lookup_connection_id(&zoe), Some(ConnectionId(1)));
}

#[tokio::test]
async fn bootstrap_failures_surface_typed_errors() {
    let h = Harness::new();

    let (b, _) = h.backends(StaticAuth::signed_out());
    let err = host_session(h.cfg.clone(), &b, LOBBY).await.unwrap_err();
    assert_eq!(err.code().as_str(), "UNRESOLVED_IDENTITY");

    // nobody has published a join code yet
    let (b, _) = h.backends(StaticAuth::signed_in("kai"));
    let err = join_session(h.cfg.clone(), &b, LOBBY).await.unwrap_err();
    assert_eq!(err.code().as_str(), "NOT_CONNECTED");

    // kai is not roster[0]; the transport is released again
    let (b, transport) = h.backends(StaticAuth::signed_in("kai"));
    let err = host_session(h.cfg.clone(), &b, LOBBY).await.unwrap_err();
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
    assert!(transport.configured().is_none());
    assert_eq!(h.hub.listener_count(), 0);

    let (b, _) = h.backends(StaticAuth::signed_in("hana"));
    let err = host_session(h.cfg.clone(), &b, "no-such-lobby").await.unwrap_err();
    assert_eq!(err.code().as_str(), "LOBBY_SERVICE");

    h.relay.set_available(false);
    let (b, _) = h.backends(StaticAuth::signed_in("hana"));
    let err = host_session(h.cfg.clone(), &b, LOBBY).await.unwrap_err();
    assert_eq!(err.code().as_str(), "RELAY_SERVICE");
}

#[tokio::test]
async fn malformed_or_unknown_join_codes_are_rejected() {
    for code in ["ab-12", "ZZZZZZ"] {
        let h = Harness::new();
        let mut desc = SessionDescriptor::new(LOBBY, vec![PlayerRef::new("hana", "Hana"), PlayerRef::new("kai", "Kai")]);
        desc.metadata.insert("joinCode".into(), code.into());
        h.lobby.put(desc);

        let (b, transport) = h.backends(StaticAuth::signed_in("kai"));
        let err = join_session(h.cfg.clone(), &b, LOBBY).await.unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_JOIN_CODE", "code {code}");
        assert!(transport.configured().is_none());
    }
}

#[tokio::test]
async fn session_view_resolves_roster_and_identities() {
    let h = Harness::new();
    let host = h.host("hana").await;
    let kai = h.join("kai").await;
    converged(&host, &[&kai]).await;
    kai.ready().set_ready(true).await.unwrap();
    eventually("kai ready", || host.ready().is_ready(&PlayerId::from("kai"))).await;

    let view = hostsync_session::ops::session_view(&host);
    assert_eq!(view.session_id.as_deref(), Some(LOBBY));
    assert_eq!(view.role, "host");
    assert!(view.join_code.is_some());
    assert_eq!(view.theme, host.theme().current());

    let names: Vec<_> = view.players.iter().map(|p| p.display_name.as_str()).collect();
    assert_eq!(names, ["Hana", "Kai", "Zoe"]);
    assert!(view.players[0].is_host);
    assert!(view.players[1].ready);
    assert_eq!(view.players[1].connection, Some(ConnectionId(1)));
    assert_eq!(view.players[2].connection, None);

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["players"][1]["player_id"], "kai");
}
