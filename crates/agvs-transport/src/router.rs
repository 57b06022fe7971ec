//! ---
//! agvs_section: "03-transport"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Exact-match channel routing and the dispatch loop."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::broker::InboundMessage;

/// Receiver for one channel's inbound messages.
///
/// Failures are terminal inside the handler: implementations log and return,
/// nothing propagates back into the dispatch loop. Slow work must be handed
/// off (spawned task or bounded queue) so the loop is never blocked on it.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Process one inbound message.
    async fn handle(&self, message: InboundMessage);
}

/// Dispatch counters, sampled for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterCounters {
    /// Messages handed to a registered handler.
    pub dispatched: u64,
    /// Messages dropped because no handler matched their channel.
    pub dropped: u64,
}

/// Maps exact channel strings to handlers; grows at runtime as vehicles
/// appear.
///
/// No wildcard matching: per-vehicle channels are registered individually. A
/// channel without a handler is not an error; its messages are counted and
/// dropped.
#[derive(Default)]
pub struct TopicRouter {
    handlers: RwLock<HashMap<String, Arc<dyn ChannelHandler>>>,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

impl TopicRouter {
    /// Construct an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `channel`, replacing any earlier registration
    /// for that exact string. Returns `true` when a handler was replaced.
    pub fn register(&self, channel: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> bool {
        self.handlers
            .write()
            .insert(channel.into(), handler)
            .is_some()
    }

    /// Channels currently holding a handler, sorted.
    pub fn registered_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.handlers.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Route one message to its handler by exact channel match.
    pub async fn dispatch(&self, message: InboundMessage) {
        let handler = self.handlers.read().get(&message.channel).cloned();
        match handler {
            Some(handler) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                handler.handle(message).await;
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %message.channel, "no handler for channel; message dropped");
            }
        }
    }

    /// Sample the dispatch counters.
    pub fn counters(&self) -> RouterCounters {
        RouterCounters {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consume the inbound stream sequentially, dispatching each message in
/// arrival order until the stream closes or shutdown is signalled.
pub async fn run_dispatch_loop(
    router: Arc<TopicRouter>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe = inbound.recv() => match maybe {
                Some(message) => router.dispatch(message).await,
                None => {
                    debug!("inbound stream closed; dispatch loop exiting");
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!("shutdown signalled; dispatch loop exiting");
                break;
            }
        }
    }
}
