//! ---
//! agvs_section: "04-fleet-store"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Fleet domain records and storage seam."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod journal;
pub mod memory;
pub mod model;
pub mod store;

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for store and journal operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing journal files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use journal::{replay, EventJournal, FleetEvent, JournalEntry, JournalReader};
pub use memory::{FleetSeed, MemoryStore};
pub use model::{
    Alarm, AlarmType, ArcRecord, NodeRecord, Origin, StateRecord, Travel, TravelStatus, Vehicle,
};
pub use store::FleetStore;
