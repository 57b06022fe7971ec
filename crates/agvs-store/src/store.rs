//! ---
//! agvs_section: "04-fleet-store"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Async storage seam consumed by the coordinator."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::model::{
    Alarm, AlarmType, ArcRecord, NodeRecord, Origin, StateRecord, Travel, TravelStatus, Vehicle,
};
use crate::Result;

/// Storage operations the coordinator depends on.
///
/// The supervision database sits behind this seam; [`crate::MemoryStore`]
/// implements it for tests and broker-less operation. Every call is a
/// suspension point and may take arbitrarily long; callers must not hold
/// locks across it.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Enumerate every known vehicle; used at startup to wire channels.
    async fn find_vehicles(&self) -> Result<Vec<Vehicle>>;

    /// The most recently created travel for `vehicle_id` in `status`, if any.
    async fn find_latest_travel(
        &self,
        vehicle_id: i64,
        status: TravelStatus,
    ) -> Result<Option<Travel>>;

    /// Insert or update a travel; returns the stored copy with its id set.
    async fn save_travel(&self, travel: Travel) -> Result<Travel>;

    /// Append one immutable state sample; returns the stored copy.
    async fn save_state(&self, record: StateRecord) -> Result<StateRecord>;

    /// Resolve an alarm type by exact criticity match.
    async fn find_alarm_type(&self, criticity: &str) -> Result<Option<AlarmType>>;

    /// Resolve an origin by exact label match.
    async fn find_origin(&self, label: &str) -> Result<Option<Origin>>;

    /// Persist one alarm row; returns the stored copy with its id set.
    async fn save_alarm(&self, alarm: Alarm) -> Result<Alarm>;

    /// Every map node.
    async fn find_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Every map arc with its endpoints.
    async fn find_arcs(&self) -> Result<Vec<ArcRecord>>;
}
