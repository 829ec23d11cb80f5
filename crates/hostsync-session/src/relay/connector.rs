use std::sync::Arc;
use std::time::Instant;

use hostsync_core::error::{HostSyncError, Result};

use crate::obs::SessionMetrics;
use crate::relay::{ConnectionType, RelayAllocation, RelayServerEndpoint, RelayService};
use crate::transport::{Transport, TransportConfig, TransportRole};

/// Obtains relay allocations and turns them into transport configuration.
pub struct RelayConnector {
    relay: Arc<dyn RelayService>,
    preferred: ConnectionType,
    metrics: Arc<SessionMetrics>,
}

impl RelayConnector {
    pub fn new(
        relay: Arc<dyn RelayService>,
        preferred: ConnectionType,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            relay,
            preferred,
            metrics,
        }
    }

    /// Allocate a relay slot for hosting and fetch its join code.
    pub async fn create_host_allocation(&self, max_players: u32) -> Result<(RelayAllocation, String)> {
        let started = Instant::now();
        let mut allocation = self
            .relay
            .create_allocation(max_players)
            .await
            .map_err(|e| self.failed("create", e))?;
        self.metrics
            .relay_call_duration
            .observe(&[("op", "create")], started.elapsed());

        let started = Instant::now();
        let code = self
            .relay
            .get_join_code(&allocation.allocation_id)
            .await
            .map_err(|e| self.failed("join_code", e))?;
        self.metrics
            .relay_call_duration
            .observe(&[("op", "join_code")], started.elapsed());

        allocation.join_code = code.clone();
        tracing::info!(allocation = %allocation.allocation_id, %max_players, "relay host allocation created");
        Ok((allocation, code))
    }

    /// Redeem a join code for a client allocation.
    pub async fn join_allocation(&self, join_code: &str) -> Result<RelayAllocation> {
        let code = normalize_join_code(join_code)?;

        let started = Instant::now();
        let mut allocation = self
            .relay
            .join_allocation(&code)
            .await
            .map_err(|e| self.failed("join", e))?;
        self.metrics
            .relay_call_duration
            .observe(&[("op", "join")], started.elapsed());

        allocation.join_code = code;
        tracing::info!(allocation = %allocation.allocation_id, "relay allocation joined");
        Ok(allocation)
    }

    /// Configure the transport for the host role.
    ///
    /// The host is its own reference point, so local and remote connection
    /// data are the same bytes. Must run before the transport is started;
    /// configuring twice without `Transport::teardown` is a caller error.
    pub fn configure_host_transport(&self, allocation: &RelayAllocation, transport: &dyn Transport) -> Result<()> {
        let endpoint = self.endpoint_for(allocation)?;
        transport.configure(TransportConfig {
            role: TransportRole::Host,
            endpoint,
            allocation_id: allocation.allocation_id.clone(),
            local_connection_data: allocation.connection_data.clone(),
            remote_connection_data: allocation.connection_data.clone(),
            key: allocation.key.clone(),
            require_secure_channel: true,
        })
    }

    /// Configure the transport for the client role.
    ///
    /// Remote connection data is the host's published data. Same
    /// single-configuration precondition as the host variant.
    pub fn configure_client_transport(&self, allocation: &RelayAllocation, transport: &dyn Transport) -> Result<()> {
        let endpoint = self.endpoint_for(allocation)?;
        let host_data = allocation.host_connection_data.clone().ok_or_else(|| {
            HostSyncError::RelayService(format!(
                "allocation {} carries no host connection data",
                allocation.allocation_id
            ))
        })?;
        transport.configure(TransportConfig {
            role: TransportRole::Client,
            endpoint,
            allocation_id: allocation.allocation_id.clone(),
            local_connection_data: allocation.connection_data.clone(),
            remote_connection_data: host_data,
            key: allocation.key.clone(),
            require_secure_channel: true,
        })
    }

    fn endpoint_for(&self, allocation: &RelayAllocation) -> Result<RelayServerEndpoint> {
        select_secure_endpoint(&allocation.endpoints, self.preferred)
            .cloned()
            .ok_or_else(|| {
                HostSyncError::RelayService(format!(
                    "allocation {} has no secure endpoint",
                    allocation.allocation_id
                ))
            })
    }

    fn failed(&self, op: &str, e: HostSyncError) -> HostSyncError {
        self.metrics.relay_failures.inc(&[("op", op), ("code", e.code().as_str())]);
        tracing::warn!(%op, error = %e, "relay call failed");
        e
    }
}

/// Pick the endpoint to use: the preferred type if it is offered securely,
/// otherwise any endpoint whose type mandates encryption.
pub fn select_secure_endpoint(
    endpoints: &[RelayServerEndpoint],
    preferred: ConnectionType,
) -> Option<&RelayServerEndpoint> {
    let usable = |e: &&RelayServerEndpoint| e.secure && e.connection_type.is_secure();
    endpoints
        .iter()
        .filter(usable)
        .find(|e| e.connection_type == preferred)
        .or_else(|| endpoints.iter().find(usable))
}

fn normalize_join_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_ascii_uppercase();
    let valid_len = (6..=12).contains(&code.len());
    if !valid_len || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(HostSyncError::InvalidJoinCode(format!("malformed join code: {raw:?}")));
    }
    Ok(code)
}
