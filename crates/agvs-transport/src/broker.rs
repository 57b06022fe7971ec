//! ---
//! agvs_section: "03-transport"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Broker seam shared by the MQTT and in-memory backends."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;

use crate::Result;

/// One message received from the broker, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Channel the message arrived on.
    pub channel: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Construct an inbound message from owned parts.
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe primitives over the fleet broker.
///
/// Delivery on data channels is at-most-once and unordered across channels;
/// within one channel, arrival order is preserved. A successful `publish`
/// only means the message was handed to the session, never that anyone
/// received it.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish a payload on `channel`, fire-and-forget.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Add `channel` to the active subscription set. Idempotent.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Delay schedule for broker reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; also bounds the added jitter.
    pub min_delay: Duration,
    /// Ceiling no backoff step exceeds.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Construct a policy from the configured bounds.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Calculate the delay for the provided attempt (1-indexed) with
    /// exponential growth and additive jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exponent = attempt.saturating_sub(1).min(8);
        let base = self.min_delay.mul_f64(2u32.pow(exponent) as f64);
        let jitter_ms = rng.gen_range(0..=self.min_delay.as_millis().max(1)) as u64;
        (base + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}
