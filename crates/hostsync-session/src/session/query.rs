//! Pure derivations over the coordinator's descriptor.

use hostsync_core::ids::PlayerId;

use super::{AuthService, DisplayName, SessionCoordinator, SessionDescriptor};

/// `roster[0]`, if any.
pub fn host_player_id(descriptor: Option<&SessionDescriptor>) -> Option<PlayerId> {
    descriptor.and_then(|d| d.host()).map(|p| p.player_id.clone())
}

/// Whether `local` is the designated host. False when either side is absent.
pub fn is_host(descriptor: Option<&SessionDescriptor>, local: Option<&PlayerId>) -> bool {
    match (host_player_id(descriptor), local) {
        (Some(host), Some(me)) => &host == me,
        _ => false,
    }
}

/// Borrowed view combining the coordinator with the local identity.
pub struct SessionQuery<'a> {
    coordinator: &'a SessionCoordinator,
    auth: &'a dyn AuthService,
}

impl<'a> SessionQuery<'a> {
    pub fn new(coordinator: &'a SessionCoordinator, auth: &'a dyn AuthService) -> Self {
        Self { coordinator, auth }
    }

    /// Local stable identity, only once signed in.
    pub fn local_player_id(&self) -> Option<PlayerId> {
        if self.auth.is_signed_in() {
            self.auth.player_id()
        } else {
            None
        }
    }

    pub fn is_local_player_host(&self) -> bool {
        let descriptor = self.coordinator.descriptor();
        is_host(descriptor.as_ref(), self.local_player_id().as_ref())
    }

    pub fn host_player_id(&self) -> Option<PlayerId> {
        host_player_id(self.coordinator.descriptor().as_ref())
    }

    pub fn local_display_name(&self) -> Option<DisplayName> {
        self.local_player_id()
            .map(|me| self.coordinator.resolve_display_name(&me))
    }
}
