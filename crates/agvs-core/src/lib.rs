//! ---
//! agvs_section: "06-coordinator"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Fleet coordinator kernel: correlation, ingest, snapshots."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
#![warn(missing_docs)]

use std::sync::Arc;

use agvs_store::{EventJournal, FleetEvent};
use thiserror::Error;
use tracing::warn;

pub mod alerts;
pub mod coordinator;
pub mod correlator;
pub mod snapshot;
pub mod telemetry;

/// Result alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the coordinator's public operations.
///
/// Handler-internal failures never reach this type; they are terminal at the
/// handler boundary and only logged.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Broker publish or subscribe failed.
    #[error("transport error: {0}")]
    Transport(#[from] agvs_transport::TransportError),
    /// Store lookup or write failed.
    #[error("store error: {0}")]
    Store(#[from] agvs_store::StoreError),
    /// A payload could not be encoded for the wire.
    #[error("wire error: {0}")]
    Wire(#[from] agvs_msg::WireError),
}

pub use coordinator::{CoordinatorHandle, FleetCoordinator};
pub use correlator::{spawn_expiry_sweeper, CommandCorrelator, PendingCommand};

/// Append an event to the journal when one is configured. Journal failures
/// must never fail the operation that produced the event.
pub(crate) fn record_event(journal: &Option<Arc<EventJournal>>, event: FleetEvent) {
    if let Some(journal) = journal {
        if let Err(err) = journal.record(event) {
            warn!(error = %err, "journal append failed");
        }
    }
}
