//! Shared error type across hostsync crates.

use thiserror::Error;

/// Stable error codes surfaced to callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Relay allocation or join failed (quota, network, malformed code).
    RelayService,
    /// Join code rejected before or by the relay.
    InvalidJoinCode,
    /// Lobby fetch/update failed.
    LobbyService,
    /// Write attempted by a non-authoritative participant.
    AuthorityViolation,
    /// Connection or player id lookup missed.
    UnresolvedIdentity,
    /// Refresh failed; previous snapshot retained.
    StaleDescriptor,
    /// No session / peer to talk to.
    NotConnected,
    /// Malformed frame or argument.
    BadRequest,
    /// Unsupported wire protocol version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and ops output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RelayService => "RELAY_SERVICE",
            ErrorCode::InvalidJoinCode => "INVALID_JOIN_CODE",
            ErrorCode::LobbyService => "LOBBY_SERVICE",
            ErrorCode::AuthorityViolation => "AUTHORITY_VIOLATION",
            ErrorCode::UnresolvedIdentity => "UNRESOLVED_IDENTITY",
            ErrorCode::StaleDescriptor => "STALE_DESCRIPTOR",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HostSyncError>;

/// Unified error type used by core and session crates.
#[derive(Debug, Error)]
pub enum HostSyncError {
    #[error("relay service: {0}")]
    RelayService(String),
    #[error("invalid join code: {0}")]
    InvalidJoinCode(String),
    #[error("lobby service: {0}")]
    LobbyService(String),
    #[error("authority violation: {0}")]
    AuthorityViolation(String),
    #[error("unresolved identity: {0}")]
    UnresolvedIdentity(String),
    #[error("stale descriptor: {0}")]
    StaleDescriptor(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl HostSyncError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HostSyncError::RelayService(_) => ErrorCode::RelayService,
            HostSyncError::InvalidJoinCode(_) => ErrorCode::InvalidJoinCode,
            HostSyncError::LobbyService(_) => ErrorCode::LobbyService,
            HostSyncError::AuthorityViolation(_) => ErrorCode::AuthorityViolation,
            HostSyncError::UnresolvedIdentity(_) => ErrorCode::UnresolvedIdentity,
            HostSyncError::StaleDescriptor(_) => ErrorCode::StaleDescriptor,
            HostSyncError::NotConnected(_) => ErrorCode::NotConnected,
            HostSyncError::BadRequest(_) => ErrorCode::BadRequest,
            HostSyncError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            HostSyncError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for errors caused by a misbehaving or stale participant.
    /// These are logged and dropped, never propagated as fatal.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            HostSyncError::AuthorityViolation(_) | HostSyncError::UnresolvedIdentity(_)
        )
    }
}
