use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hostsync_core::error::{HostSyncError, Result};

use crate::obs::SessionMetrics;
use crate::replication::{ChannelIdentity, Egress, StateChannel, Subscription, Uplink};

pub const THEME_CHANNEL: &str = "theme";

/// Session theme. The host picks one of the configured choices when the
/// first participant asks; afterwards only the host may reselect.
pub struct ThemeService {
    channel: Arc<StateChannel<String>>,
    choices: Arc<[String]>,
}

impl ThemeService {
    pub fn authority(
        identity: ChannelIdentity,
        egress: Arc<Egress>,
        choices: Vec<String>,
        resend_on_request: bool,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self> {
        let choices: Arc<[String]> = choices.into();
        let pool = Arc::clone(&choices);
        let channel = StateChannel::authority(
            THEME_CHANNEL,
            identity,
            egress,
            Arc::new(move || pick(&pool)),
            resend_on_request,
            metrics,
        )?;
        Ok(Self {
            channel: Arc::new(channel),
            choices,
        })
    }

    pub fn replica(
        identity: ChannelIdentity,
        uplink: Uplink,
        choices: Vec<String>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            channel: Arc::new(StateChannel::replica(THEME_CHANNEL, identity, uplink, metrics)),
            choices: choices.into(),
        }
    }

    pub fn channel(&self) -> Arc<StateChannel<String>> {
        Arc::clone(&self.channel)
    }

    pub fn current(&self) -> Option<String> {
        self.channel.value()
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn subscribe(&self) -> Subscription<String> {
        self.channel.subscribe()
    }

    /// Administrative reselection (authority only).
    pub async fn select(&self, theme: &str) -> Result<()> {
        if !self.choices.iter().any(|c| c == theme) {
            return Err(HostSyncError::BadRequest(format!("unknown theme: {theme}")));
        }
        self.channel.set_value(theme.to_string()).await
    }
}

// Pseudo-random pick from the clock; only needs to vary between sessions.
fn pick(choices: &[String]) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as usize;
    choices
        .get(nanos % choices.len().max(1))
        .cloned()
        .unwrap_or_default()
}
