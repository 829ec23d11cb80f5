use std::collections::HashSet;
use std::net::SocketAddr;

use serde::Deserialize;
use hostsync_core::error::{HostSyncError, Result};

use crate::relay::ConnectionType;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub version: u32,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub lobby: LobbySection,

    #[serde(default)]
    pub replication: ReplicationSection,

    #[serde(default)]
    pub themes: ThemeSection,

    #[serde(default)]
    pub ops: OpsSection,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: 1,
            relay: RelaySection::default(),
            lobby: LobbySection::default(),
            replication: ReplicationSection::default(),
            themes: ThemeSection::default(),
            ops: OpsSection::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HostSyncError::UnsupportedVersion);
        }

        self.relay.validate()?;
        self.lobby.validate()?;
        self.replication.validate()?;
        self.themes.validate()?;
        self.ops.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Preferred relay endpoint type; must be a secure one.
    #[serde(default = "default_connection_type")]
    pub connection_type: String,

    #[serde(default = "default_max_players")]
    pub max_players: u32,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            connection_type: default_connection_type(),
            max_players: default_max_players(),
        }
    }
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        let ty = self.preferred_connection_type()?;
        if !ty.is_secure() {
            return Err(HostSyncError::BadRequest(format!(
                "relay.connection_type must be a secure type (dtls or wss), got {}",
                ty.as_str()
            )));
        }
        if !(1..=100).contains(&self.max_players) {
            return Err(HostSyncError::BadRequest(
                "relay.max_players must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }

    pub fn preferred_connection_type(&self) -> Result<ConnectionType> {
        self.connection_type.parse()
    }
}

fn default_connection_type() -> String {
    "dtls".into()
}
fn default_max_players() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LobbySection {
    /// Lobby metadata key holding the relay join code.
    #[serde(default = "default_join_code_key")]
    pub join_code_key: String,
}

impl Default for LobbySection {
    fn default() -> Self {
        Self {
            join_code_key: default_join_code_key(),
        }
    }
}

impl LobbySection {
    pub fn validate(&self) -> Result<()> {
        if self.join_code_key.trim().is_empty() {
            return Err(HostSyncError::BadRequest(
                "lobby.join_code_key must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_join_code_key() -> String {
    "joinCode".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationSection {
    /// Per-connection outbound queue capacity (frames).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,

    /// Resend the current value when an init request arrives for a Set channel.
    /// When off, the host pushes every set value to each newly accepted peer.
    #[serde(default = "default_resend_on_request")]
    pub resend_on_request: bool,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            outbound_queue: default_outbound_queue(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            resend_on_request: default_resend_on_request(),
        }
    }
}

impl ReplicationSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.outbound_queue) {
            return Err(HostSyncError::BadRequest(
                "replication.outbound_queue must be between 1 and 65536".into(),
            ));
        }
        if !(100..=60000).contains(&self.broadcast_timeout_ms) {
            return Err(HostSyncError::BadRequest(
                "replication.broadcast_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        Ok(())
    }
}

fn default_outbound_queue() -> usize {
    256
}
fn default_broadcast_timeout_ms() -> u64 {
    1500
}
fn default_resend_on_request() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThemeSection {
    #[serde(default = "default_theme_choices")]
    pub choices: Vec<String>,
}

impl Default for ThemeSection {
    fn default() -> Self {
        Self {
            choices: default_theme_choices(),
        }
    }
}

impl ThemeSection {
    pub fn validate(&self) -> Result<()> {
        if self.choices.is_empty() {
            return Err(HostSyncError::BadRequest("themes.choices must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for c in &self.choices {
            if c.trim().is_empty() {
                return Err(HostSyncError::BadRequest("themes.choices entries must not be blank".into()));
            }
            if !seen.insert(c.as_str()) {
                return Err(HostSyncError::BadRequest(format!("duplicate theme: {c}")));
            }
        }
        Ok(())
    }
}

fn default_theme_choices() -> Vec<String> {
    ["Streetwear", "Y2K", "Formal", "Vintage", "Sporty"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    #[serde(default = "default_ops_listen")]
    pub listen: String,
}

impl Default for OpsSection {
    fn default() -> Self {
        Self {
            listen: default_ops_listen(),
        }
    }
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|_| {
            HostSyncError::BadRequest(format!("ops.listen must be a valid SocketAddr: {}", self.listen))
        })
    }
}

fn default_ops_listen() -> String {
    "127.0.0.1:9095".into()
}
