//! Session start-up for both roles.

use std::sync::Arc;

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::PlayerId;

use crate::config::SessionConfig;
use crate::obs::SessionMetrics;
use crate::relay::{RelayConnector, RelayService};
use crate::session::{host_player_id, is_host, AuthService, LobbyService, SessionCoordinator};
use crate::transport::Transport;

use super::SessionContext;

/// External services a session is started against.
#[derive(Clone)]
pub struct Backends {
    pub relay: Arc<dyn RelayService>,
    pub lobby: Arc<dyn LobbyService>,
    pub auth: Arc<dyn AuthService>,
    pub transport: Arc<dyn Transport>,
}

/// Host the given lobby.
///
/// Allocates a relay slot, configures the transport, publishes the join code
/// to the lobby and, once the refreshed roster confirms the local player is
/// the host, starts listening. The transport is torn down again if any step
/// after configuration fails.
pub async fn host_session(cfg: Arc<SessionConfig>, backends: &Backends, session_id: &str) -> Result<SessionContext> {
    let metrics = Arc::new(SessionMetrics::default());
    let local = signed_in_player(backends.auth.as_ref())?;
    let coordinator = Arc::new(SessionCoordinator::new(
        backends.lobby.clone(),
        cfg.lobby.join_code_key.clone(),
        metrics.clone(),
    ));
    load_lobby(&coordinator, backends.lobby.as_ref(), session_id, &metrics).await?;

    let connector = RelayConnector::new(
        backends.relay.clone(),
        cfg.relay.preferred_connection_type()?,
        metrics.clone(),
    );
    let (allocation, code) = connector.create_host_allocation(cfg.relay.max_players).await?;
    connector.configure_host_transport(&allocation, backends.transport.as_ref())?;

    let started = async {
        coordinator.publish_join_code(&code).await?;
        if !is_host(coordinator.descriptor().as_ref(), Some(&local)) {
            return Err(HostSyncError::BadRequest(format!(
                "{local} is not the host of lobby {session_id}"
            )));
        }
        let incoming = backends.transport.start_host().await?;
        let ctx = SessionContext::host(
            cfg.clone(),
            local.clone(),
            coordinator.clone(),
            backends.transport.clone(),
            metrics.clone(),
        )?;
        Ok((ctx, incoming))
    }
    .await;

    match started {
        Ok((ctx, incoming)) => {
            ctx.serve(incoming);
            tracing::info!(session = %session_id, player = %local, join_code = %code, "hosting session");
            Ok(ctx)
        }
        Err(e) => {
            backends.transport.teardown();
            tracing::warn!(session = %session_id, error = %e, "hosting failed");
            Err(e)
        }
    }
}

/// Join the given lobby as a client via the join code its host published.
pub async fn join_session(cfg: Arc<SessionConfig>, backends: &Backends, session_id: &str) -> Result<SessionContext> {
    let metrics = Arc::new(SessionMetrics::default());
    let local = signed_in_player(backends.auth.as_ref())?;
    let coordinator = Arc::new(SessionCoordinator::new(
        backends.lobby.clone(),
        cfg.lobby.join_code_key.clone(),
        metrics.clone(),
    ));
    load_lobby(&coordinator, backends.lobby.as_ref(), session_id, &metrics).await?;

    let host = host_player_id(coordinator.descriptor().as_ref())
        .ok_or_else(|| HostSyncError::LobbyService(format!("lobby {session_id} has an empty roster")))?;
    if host == local {
        return Err(HostSyncError::BadRequest(format!(
            "{local} hosts lobby {session_id} and cannot join it"
        )));
    }
    let code = coordinator
        .join_code()
        .ok_or_else(|| HostSyncError::NotConnected(format!("lobby {session_id} has no join code yet")))?;

    let connector = RelayConnector::new(
        backends.relay.clone(),
        cfg.relay.preferred_connection_type()?,
        metrics.clone(),
    );
    let allocation = connector.join_allocation(&code).await?;
    connector.configure_client_transport(&allocation, backends.transport.as_ref())?;

    let started = async {
        let link = backends.transport.start_client().await?;
        SessionContext::client(
            cfg.clone(),
            local.clone(),
            host.clone(),
            coordinator.clone(),
            backends.transport.clone(),
            link,
            metrics.clone(),
        )
        .await
    }
    .await;

    match started {
        Ok(ctx) => {
            tracing::info!(session = %session_id, player = %local, %host, "joined session");
            Ok(ctx)
        }
        Err(e) => {
            backends.transport.teardown();
            tracing::warn!(session = %session_id, error = %e, "joining failed");
            Err(e)
        }
    }
}

fn signed_in_player(auth: &dyn AuthService) -> Result<PlayerId> {
    if !auth.is_signed_in() {
        return Err(HostSyncError::UnresolvedIdentity("local player is not signed in".into()));
    }
    auth.player_id()
        .ok_or_else(|| HostSyncError::UnresolvedIdentity("signed in without a player id".into()))
}

async fn load_lobby(
    coordinator: &SessionCoordinator,
    lobby: &dyn LobbyService,
    session_id: &str,
    metrics: &SessionMetrics,
) -> Result<()> {
    let descriptor = lobby.get_lobby(session_id).await.map_err(|e| {
        metrics.lobby_failures.inc(&[("op", "get_lobby")]);
        tracing::warn!(session = %session_id, error = %e, "lobby fetch failed");
        e
    })?;
    coordinator.set_session(descriptor);
    Ok(())
}
