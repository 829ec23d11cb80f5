use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use hostsync_core::error::{HostSyncError, Result};
use hostsync_core::ids::ConnectionId;
use hostsync_core::protocol::Frame;

/// Where an inbound frame came from.
#[derive(Debug, Clone, Copy)]
pub struct InboundCtx {
    pub from: ConnectionId,
}

/// Handler for every frame addressed to one channel name.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel(&self) -> &str;
    async fn handle(&self, ctx: InboundCtx, frame: Frame) -> Result<()>;
}

/// Registry and router for channel handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: DashMap<String, Arc<dyn ChannelHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn ChannelHandler>) {
        self.handlers.insert(handler.channel().to_string(), handler);
    }

    pub fn registered_channels(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub async fn dispatch(&self, ctx: InboundCtx, frame: Frame) -> Result<()> {
        let handler = self
            .handlers
            .get(frame.ch.as_str())
            .ok_or_else(|| HostSyncError::BadRequest(format!("unknown channel: {}", frame.ch)))?
            .value()
            .clone();
        handler.handle(ctx, frame).await
    }
}
