//! ---
//! agvs_section: "03-transport"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "In-process broker hub for tests and offline runs."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broker::{Broker, InboundMessage};
use crate::Result;

#[derive(Default)]
struct HubInner {
    next_endpoint: usize,
    subscriptions: HashMap<String, Vec<(usize, mpsc::Sender<InboundMessage>)>>,
}

/// In-process publish/subscribe hub mirroring broker semantics: exact-topic
/// fan-out, per-channel ordering, subscribers receive their own publishes.
///
/// Every endpoint connected through [`MemoryHub::connect`] gets its own
/// inbound stream; publishing delivers to every endpoint subscribed to that
/// exact channel.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    /// Construct an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint, returning its broker handle and inbound stream.
    pub fn connect(&self, capacity: usize) -> (MemoryBroker, mpsc::Receiver<InboundMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let endpoint = {
            let mut inner = self.inner.lock();
            inner.next_endpoint += 1;
            inner.next_endpoint
        };
        (
            MemoryBroker {
                endpoint,
                hub: self.inner.clone(),
                sender,
            },
            receiver,
        )
    }
}

/// One endpoint attached to a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryBroker {
    endpoint: usize,
    hub: Arc<Mutex<HubInner>>,
    sender: mpsc::Sender<InboundMessage>,
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let targets: Vec<mpsc::Sender<InboundMessage>> = {
            let mut inner = self.hub.lock();
            match inner.subscriptions.get_mut(channel) {
                Some(endpoints) => {
                    endpoints.retain(|(_, sender)| !sender.is_closed());
                    endpoints
                        .iter()
                        .map(|(_, sender)| sender.clone())
                        .collect()
                }
                None => Vec::new(),
            }
        };

        for target in targets {
            // A closed endpoint mid-send is equivalent to an unsubscribed one.
            let _ = target
                .send(InboundMessage::new(channel, payload.clone()))
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut inner = self.hub.lock();
        let endpoints = inner.subscriptions.entry(channel.to_owned()).or_default();
        if !endpoints.iter().any(|(id, _)| *id == self.endpoint) {
            endpoints.push((self.endpoint, self.sender.clone()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_exact_subscribers_only() {
        let hub = MemoryHub::new();
        let (alpha, mut alpha_rx) = hub.connect(8);
        let (beta, mut beta_rx) = hub.connect(8);

        alpha.subscribe("vehicles/1/state").await.expect("subscribe");
        beta.publish("vehicles/1/state", b"one".to_vec())
            .await
            .expect("publish");
        beta.publish("vehicles/2/state", b"two".to_vec())
            .await
            .expect("publish");

        let received = alpha_rx.recv().await.expect("message");
        assert_eq!(received.channel, "vehicles/1/state");
        assert_eq!(&received.payload[..], b"one");

        assert!(alpha_rx.try_recv().is_err());
        assert!(beta_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_subscriptions_deliver_once() {
        let hub = MemoryHub::new();
        let (endpoint, mut rx) = hub.connect(8);

        endpoint.subscribe("system/alerts").await.expect("subscribe");
        endpoint.subscribe("system/alerts").await.expect("resubscribe");
        endpoint
            .publish("system/alerts", b"alert".to_vec())
            .await
            .expect("publish");

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_channel_order_is_preserved() {
        let hub = MemoryHub::new();
        let (consumer, mut rx) = hub.connect(8);
        let (producer, _producer_rx) = hub.connect(8);

        consumer.subscribe("vehicles/2/state").await.expect("subscribe");
        for i in 0..3u8 {
            producer
                .publish("vehicles/2/state", vec![i])
                .await
                .expect("publish");
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.expect("message").payload[0]);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }
}
