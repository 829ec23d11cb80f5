//! Session config loader (strict parsing).

pub mod schema;

use std::fs;

use hostsync_core::error::{HostSyncError, Result};

pub use schema::{
    LobbySection, OpsSection, RelaySection, ReplicationSection, SessionConfig, ThemeSection,
};

pub fn load_from_file(path: &str) -> Result<SessionConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| HostSyncError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<SessionConfig> {
    let cfg: SessionConfig = serde_yaml::from_str(s)
        .map_err(|e| HostSyncError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
