//! Relay allocation types and the relay service contract.
//!
//! The relay is a third-party intermediary: the host asks it for an
//! allocation and a join code, clients redeem the code for their own
//! allocation, and both sides configure the transport from what they got.

mod connector;

use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;

use hostsync_core::error::{HostSyncError, Result};

pub use connector::{select_secure_endpoint, RelayConnector};

/// Relay endpoint protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Udp,
    Dtls,
    Ws,
    Wss,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Udp => "udp",
            ConnectionType::Dtls => "dtls",
            ConnectionType::Ws => "ws",
            ConnectionType::Wss => "wss",
        }
    }

    /// Whether this type mandates an encrypted channel.
    pub fn is_secure(self) -> bool {
        matches!(self, ConnectionType::Dtls | ConnectionType::Wss)
    }
}

impl FromStr for ConnectionType {
    type Err = HostSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(ConnectionType::Udp),
            "dtls" => Ok(ConnectionType::Dtls),
            "ws" => Ok(ConnectionType::Ws),
            "wss" => Ok(ConnectionType::Wss),
            other => Err(HostSyncError::BadRequest(format!("unknown connection type: {other}"))),
        }
    }
}

/// One relay server endpoint as published in an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerEndpoint {
    pub host: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub secure: bool,
}

/// Result of creating or joining a relay allocation.
///
/// Produced once per hosting/joining attempt and consumed immediately to
/// configure the transport. Never persisted.
#[derive(Debug, Clone)]
pub struct RelayAllocation {
    pub allocation_id: String,
    /// Empty until the host requested a code; the redeemed code for clients.
    pub join_code: String,
    pub endpoints: Vec<RelayServerEndpoint>,
    pub key: Bytes,
    pub connection_data: Bytes,
    /// Host's published connection data. Only present on joined allocations.
    pub host_connection_data: Option<Bytes>,
}

/// Remote relay service.
#[async_trait]
pub trait RelayService: Send + Sync {
    async fn create_allocation(&self, max_players: u32) -> Result<RelayAllocation>;
    async fn get_join_code(&self, allocation_id: &str) -> Result<String>;
    async fn join_allocation(&self, join_code: &str) -> Result<RelayAllocation>;
}
