//! hostsync demo
//!
//! Runs a host and two clients over the loopback relay/transport, walks
//! through theme initialization and ready proposals, then serves the host's
//! ops endpoints until ctrl-c.

use std::path::Path;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing_subscriber::{fmt, EnvFilter};

use hostsync_core::error::{HostSyncError, Result};
use hostsync_session::config::{self, SessionConfig};
use hostsync_session::context::{host_session, join_session, Backends};
use hostsync_session::loopback::{InMemoryLobby, InMemoryRelay, LoopbackHub, LoopbackTransport, StaticAuth};
use hostsync_session::router;
use hostsync_session::session::{PlayerRef, SessionDescriptor};

const CONFIG_PATH: &str = "hostsync.yaml";
const LOBBY_ID: &str = "demo-lobby";

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cfg = if Path::new(CONFIG_PATH).exists() {
        config::load_from_file(CONFIG_PATH)?
    } else {
        tracing::info!("{CONFIG_PATH} not found; using defaults");
        SessionConfig::default()
    };
    let cfg = Arc::new(cfg);
    let listen = cfg.ops.listen_addr()?;

    let relay = Arc::new(InMemoryRelay::new(8));
    let lobby = Arc::new(InMemoryLobby::new());
    let hub = Arc::new(LoopbackHub::new());
    lobby.put(SessionDescriptor::new(
        LOBBY_ID,
        vec![
            PlayerRef::new("p-hana", "Hana"),
            PlayerRef::new("p-kai", "Kai"),
            PlayerRef::new("p-zoe", "Zoe"),
        ],
    ));

    let backends_for = |player: &str| Backends {
        relay: relay.clone(),
        lobby: lobby.clone(),
        auth: Arc::new(StaticAuth::signed_in(player)),
        transport: Arc::new(LoopbackTransport::new(hub.clone(), cfg.replication.outbound_queue)),
    };

    let host = host_session(cfg.clone(), &backends_for("p-hana"), LOBBY_ID).await?;
    let mut theme_changes = host.theme().subscribe();
    tokio::spawn(async move {
        while let Some(change) = theme_changes.recv().await {
            tracing::info!(
                previous = ?change.previous,
                current = %change.current,
                version = change.version,
                "theme changed"
            );
        }
    });

    let kai = join_session(cfg.clone(), &backends_for("p-kai"), LOBBY_ID).await?;
    let zoe = join_session(cfg.clone(), &backends_for("p-zoe"), LOBBY_ID).await?;

    kai.ready().set_ready(true).await?;
    zoe.ready().set_ready(true).await?;
    host.ready().set_ready(true).await?;
    sleep(Duration::from_millis(100)).await;

    tracing::info!(
        theme = ?zoe.theme().current(),
        all_ready = kai.ready().all_ready(),
        "clients in sync"
    );

    let app = router::build_router(host.clone());
    tracing::info!(%listen, "ops endpoints up");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| HostSyncError::Internal(format!("bind {listen}: {e}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| HostSyncError::Internal(format!("ops server: {e}")))?;

    zoe.shutdown();
    kai.shutdown();
    host.shutdown();
    Ok(())
}
