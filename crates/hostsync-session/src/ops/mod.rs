//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 after shutdown)
//! - `/metrics` : Prometheus text format
//! - `/session` : roster, identities and replicated values as JSON

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use hostsync_core::ids::{ConnectionId, PlayerId};

use crate::context::SessionContext;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(ctx): State<SessionContext>) -> impl IntoResponse {
    if ctx.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shut down")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn metrics(State(ctx): State<SessionContext>) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        ctx.metrics().render(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub display_name: String,
    pub is_host: bool,
    pub ready: bool,
    pub connection: Option<ConnectionId>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Option<String>,
    pub join_code: Option<String>,
    pub local_player: PlayerId,
    pub role: &'static str,
    pub theme: Option<String>,
    pub theme_version: u64,
    pub players: Vec<PlayerView>,
}

/// Build the `/session` document.
pub fn session_view(ctx: &SessionContext) -> SessionView {
    let coordinator = ctx.coordinator();
    let descriptor = coordinator.descriptor();
    let board = ctx.ready().board();
    let theme = ctx.theme().channel().snapshot();

    let players = descriptor
        .as_ref()
        .map(|d| {
            d.roster
                .iter()
                .enumerate()
                .map(|(seat, p)| PlayerView {
                    player_id: p.player_id.clone(),
                    display_name: coordinator.resolve_display_name(&p.player_id).to_string(),
                    is_host: seat == 0,
                    ready: board.get(&p.player_id).copied().unwrap_or(p.ready),
                    connection: coordinator.lookup_connection_id(&p.player_id),
                })
                .collect()
        })
        .unwrap_or_default();

    SessionView {
        session_id: descriptor.as_ref().map(|d| d.session_id.clone()),
        join_code: coordinator.join_code(),
        local_player: ctx.local_player_id().clone(),
        role: if ctx.is_host() { "host" } else { "client" },
        theme: theme.value,
        theme_version: theme.version,
        players,
    }
}

pub async fn session(State(ctx): State<SessionContext>) -> Response {
    Json(session_view(&ctx)).into_response()
}
