//! ---
//! agvs_section: "02-fleet-protocol"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Wire payloads, action vocabulary and channel names."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod topics;
pub mod wire;

/// Shared result type for protocol encode/decode operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors raised while encoding or decoding fleet payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("payload codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a payload to the JSON bytes carried on the broker.
pub fn encode<T: serde::Serialize>(payload: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

/// Decode a JSON payload received from the broker.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub use wire::{
    Action, CommandEnvelope, CommandResponse, FleetAlert, MapEdge, MapNode, MapSnapshot,
    VehicleState,
};
