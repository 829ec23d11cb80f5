use tokio::sync::mpsc;

use hostsync_core::ids::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unset,
    Set,
}

/// One applied change, delivered to every watcher exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange<T> {
    pub previous: Option<T>,
    pub current: T,
    pub version: u64,
}

/// Pull-model view: value plus monotonic version (0 while unset).
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: Option<T>,
    pub version: u64,
}

impl<T> Snapshot<T> {
    pub fn state(&self) -> ChannelState {
        if self.value.is_some() {
            ChannelState::Set
        } else {
            ChannelState::Unset
        }
    }
}

/// Who this process is and who may write the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub local: PlayerId,
    pub authority: PlayerId,
}

impl ChannelIdentity {
    pub fn new(local: PlayerId, authority: PlayerId) -> Self {
        Self { local, authority }
    }

    pub fn is_local_authority(&self) -> bool {
        self.local == self.authority
    }
}

/// Change-notification handle. Deregister with `StateChannel::unsubscribe`
/// (or drop it) before the consumer goes away.
#[derive(Debug)]
pub struct Subscription<T> {
    pub(crate) id: u64,
    pub(crate) rx: mpsc::UnboundedReceiver<ValueChange<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next change, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ValueChange<T>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ValueChange<T>> {
        self.rx.try_recv().ok()
    }
}
