use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use hostsync_core::error::{HostSyncError, Result};

use crate::relay::{ConnectionType, RelayAllocation, RelayServerEndpoint, RelayService};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

#[derive(Clone)]
struct HostAllocation {
    connection_data: Bytes,
}

/// Relay control plane kept in memory.
///
/// Every allocation offers a plain UDP endpoint and a DTLS one, so endpoint
/// selection is always exercised. Connection data is what the loopback
/// transport keys its listeners on.
pub struct InMemoryRelay {
    seq: AtomicU64,
    quota: usize,
    available: AtomicBool,
    hosts: DashMap<String, HostAllocation>,
    codes: DashMap<String, String>,
    endpoints: Vec<RelayServerEndpoint>,
}

impl InMemoryRelay {
    /// `quota` caps the number of live host allocations.
    pub fn new(quota: usize) -> Self {
        Self::with_endpoints(
            quota,
            vec![
                RelayServerEndpoint {
                    host: "127.0.0.1".into(),
                    port: 7777,
                    connection_type: ConnectionType::Udp,
                    secure: false,
                },
                RelayServerEndpoint {
                    host: "127.0.0.1".into(),
                    port: 7778,
                    connection_type: ConnectionType::Dtls,
                    secure: true,
                },
            ],
        )
    }

    pub fn with_endpoints(quota: usize, endpoints: Vec<RelayServerEndpoint>) -> Self {
        Self {
            seq: AtomicU64::new(1),
            quota,
            available: AtomicBool::new(true),
            hosts: DashMap::new(),
            codes: DashMap::new(),
            endpoints,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn allocation_count(&self) -> usize {
        self.hosts.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(HostSyncError::RelayService("relay service unreachable".into()))
        }
    }

    fn next_allocation(&self) -> (u64, RelayAllocation) {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let allocation = RelayAllocation {
            allocation_id: format!("alloc-{n}"),
            join_code: String::new(),
            endpoints: self.endpoints.clone(),
            key: Bytes::from(format!("key-{n}")),
            connection_data: Bytes::from(format!("conn-{n}")),
            host_connection_data: None,
        };
        (n, allocation)
    }
}

fn join_code_for(n: u64) -> String {
    let mut x = n.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..CODE_LEN)
        .map(|_| {
            let c = CODE_ALPHABET[(x & 31) as usize] as char;
            x >>= 5;
            c
        })
        .collect()
}

#[async_trait]
impl RelayService for InMemoryRelay {
    async fn create_allocation(&self, max_players: u32) -> Result<RelayAllocation> {
        self.check_available()?;
        if max_players == 0 {
            return Err(HostSyncError::RelayService("max_players must be at least 1".into()));
        }
        if self.hosts.len() >= self.quota {
            return Err(HostSyncError::RelayService("allocation quota exceeded".into()));
        }
        let (_, allocation) = self.next_allocation();
        self.hosts.insert(
            allocation.allocation_id.clone(),
            HostAllocation {
                connection_data: allocation.connection_data.clone(),
            },
        );
        Ok(allocation)
    }

    async fn get_join_code(&self, allocation_id: &str) -> Result<String> {
        self.check_available()?;
        if !self.hosts.contains_key(allocation_id) {
            return Err(HostSyncError::RelayService(format!("unknown allocation: {allocation_id}")));
        }
        let n = allocation_id
            .strip_prefix("alloc-")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or_default();
        let code = join_code_for(n);
        self.codes.insert(code.clone(), allocation_id.to_string());
        Ok(code)
    }

    async fn join_allocation(&self, join_code: &str) -> Result<RelayAllocation> {
        self.check_available()?;
        let host = self
            .codes
            .get(join_code)
            .and_then(|id| self.hosts.get(id.value()).map(|h| h.value().clone()))
            .ok_or_else(|| HostSyncError::InvalidJoinCode(format!("no allocation for {join_code}")))?;
        let (_, mut allocation) = self.next_allocation();
        allocation.join_code = join_code.to_string();
        allocation.host_connection_data = Some(host.connection_data);
        Ok(allocation)
    }
}
