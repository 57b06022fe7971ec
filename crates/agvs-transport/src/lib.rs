//! ---
//! agvs_section: "03-transport"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Broker connection, topic routing and dispatch loop."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod broker;
pub mod memory;
pub mod mqtt;
pub mod router;

/// Result alias used throughout the transport crate.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The broker client rejected a publish/subscribe request.
    #[error("broker client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    /// The transport endpoint is no longer connected to its hub.
    #[error("transport closed")]
    Closed,
}

pub use broker::{Broker, InboundMessage, ReconnectPolicy};
pub use memory::{MemoryBroker, MemoryHub};
pub use mqtt::{MqttBroker, MqttConnection};
pub use router::{run_dispatch_loop, ChannelHandler, RouterCounters, TopicRouter};
