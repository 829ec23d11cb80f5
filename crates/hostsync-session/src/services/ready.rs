use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::PlayerId;
use hostsync_core::protocol::{Frame, FrameKind};

use crate::dispatch::{ChannelHandler, InboundCtx};
use crate::obs::SessionMetrics;
use crate::replication::{ChannelIdentity, Egress, StateChannel, Subscription, Uplink};
use crate::session::SessionCoordinator;

pub const READY_CHANNEL: &str = "ready";

/// Readiness per player, keyed by stable id.
pub type ReadyBoard = BTreeMap<PlayerId, bool>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadyProposal {
    ready: bool,
}

/// Readiness board. Clients propose their own flag; the host attributes the
/// proposal to the sender's player id and commits.
pub struct ReadyService {
    channel: StateChannel<ReadyBoard>,
    coordinator: Arc<SessionCoordinator>,
    uplink: Option<Uplink>,
}

impl ReadyService {
    pub fn authority(
        identity: ChannelIdentity,
        egress: Arc<Egress>,
        coordinator: Arc<SessionCoordinator>,
        resend_on_request: bool,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self> {
        let seed = Arc::clone(&coordinator);
        let channel = StateChannel::authority(
            READY_CHANNEL,
            identity,
            egress,
            Arc::new(move || roster_board(&seed)),
            resend_on_request,
            metrics,
        )?;
        Ok(Self {
            channel,
            coordinator,
            uplink: None,
        })
    }

    pub fn replica(
        identity: ChannelIdentity,
        uplink: Uplink,
        coordinator: Arc<SessionCoordinator>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            channel: StateChannel::replica(READY_CHANNEL, identity, uplink.clone(), metrics),
            coordinator,
            uplink: Some(uplink),
        }
    }

    pub fn board_channel(&self) -> &StateChannel<ReadyBoard> {
        &self.channel
    }

    pub fn board(&self) -> ReadyBoard {
        self.channel.value().unwrap_or_default()
    }

    pub fn is_ready(&self, player: &PlayerId) -> bool {
        self.board().get(player).copied().unwrap_or(false)
    }

    /// True once the board is non-empty and every entry is ready.
    pub fn all_ready(&self) -> bool {
        let board = self.board();
        !board.is_empty() && board.values().all(|r| *r)
    }

    pub fn subscribe(&self) -> Subscription<ReadyBoard> {
        self.channel.subscribe()
    }

    /// Set the local player's flag. The host commits directly; a client
    /// sends a proposal and sees the result when the host broadcasts it.
    pub async fn set_ready(&self, ready: bool) -> Result<()> {
        match &self.uplink {
            None => {
                let me = self.channel.identity().local.clone();
                self.apply(me, ready).await
            }
            Some(uplink) => {
                let frame = Frame::new(READY_CHANNEL, FrameKind::Propose).with_data(&ReadyProposal { ready })?;
                uplink.send(&frame).await
            }
        }
    }

    /// Drop a departed player's entry (authority only).
    pub async fn remove_player(&self, player: &PlayerId) -> Result<()> {
        if self.channel.value().map_or(true, |b| !b.contains_key(player)) {
            return Ok(());
        }
        self.channel
            .update(|board| {
                let mut next = board.cloned().unwrap_or_default();
                next.remove(player);
                next
            })
            .await
    }

    async fn apply(&self, player: PlayerId, ready: bool) -> Result<()> {
        let coordinator = Arc::clone(&self.coordinator);
        self.channel
            .update(move |board| {
                let mut next = board.cloned().unwrap_or_else(|| roster_board(&coordinator));
                next.insert(player, ready);
                next
            })
            .await
    }
}

fn roster_board(coordinator: &SessionCoordinator) -> ReadyBoard {
    coordinator
        .descriptor()
        .map(|d| d.roster.into_iter().map(|p| (p.player_id, p.ready)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl ChannelHandler for ReadyService {
    fn channel(&self) -> &str {
        READY_CHANNEL
    }

    async fn handle(&self, ctx: InboundCtx, frame: Frame) -> Result<()> {
        if frame.kind != FrameKind::Propose {
            return self.channel.handle(ctx, frame).await;
        }
        if !self.channel.is_authority() {
            return Err(HostSyncError::BadRequest("proposals are only accepted by the host".into()));
        }
        // An unbound sender is reported and the proposal dropped.
        let player = self.coordinator.resolve_sender(ctx.from)?;
        let proposal: ReadyProposal = frame.data_as()?;
        tracing::debug!(%player, ready = proposal.ready, "ready proposal");
        self.apply(player, proposal.ready).await
    }
}
