//! ---
//! agvs_section: "04-fleet-store"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "In-memory fleet store for tests and broker-less runs."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{
    Alarm, AlarmType, ArcRecord, NodeRecord, Origin, StateRecord, Travel, TravelStatus, Vehicle,
};
use crate::store::FleetStore;
use crate::Result;

#[derive(Debug, Default)]
struct Inner {
    vehicles: BTreeMap<i64, Vehicle>,
    travels: BTreeMap<i64, Travel>,
    states: Vec<StateRecord>,
    alarm_types: BTreeMap<i64, AlarmType>,
    origins: BTreeMap<i64, Origin>,
    alarms: BTreeMap<i64, Alarm>,
    nodes: BTreeMap<i64, NodeRecord>,
    arcs: BTreeMap<i64, ArcRecord>,
    next_travel_id: i64,
    next_state_id: i64,
    next_alarm_id: i64,
}

/// Mutex-guarded in-memory [`FleetStore`].
///
/// Iteration order is deterministic (sorted by id), which keeps snapshot
/// assembly and test assertions stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vehicle, replacing any previous record with the same id.
    pub fn seed_vehicle(&self, vehicle: Vehicle) {
        self.inner.lock().vehicles.insert(vehicle.id, vehicle);
    }

    /// Register an alarm type.
    pub fn seed_alarm_type(&self, alarm_type: AlarmType) {
        self.inner
            .lock()
            .alarm_types
            .insert(alarm_type.id, alarm_type);
    }

    /// Register an origin.
    pub fn seed_origin(&self, origin: Origin) {
        self.inner.lock().origins.insert(origin.id, origin);
    }

    /// Register a map node.
    pub fn seed_node(&self, node: NodeRecord) {
        self.inner.lock().nodes.insert(node.id, node);
    }

    /// Register a map arc.
    pub fn seed_arc(&self, arc: ArcRecord) {
        self.inner.lock().arcs.insert(arc.id, arc);
    }

    /// Apply a bootstrap seed in one shot.
    pub fn apply_seed(&self, seed: FleetSeed) {
        let mut inner = self.inner.lock();
        for vehicle in seed.vehicles {
            inner.vehicles.insert(vehicle.id, vehicle);
        }
        for node in seed.nodes {
            inner.nodes.insert(node.id, node);
        }
        for arc in seed.arcs {
            inner.arcs.insert(arc.id, arc);
        }
        for alarm_type in seed.alarm_types {
            inner.alarm_types.insert(alarm_type.id, alarm_type);
        }
        for origin in seed.origins {
            inner.origins.insert(origin.id, origin);
        }
    }

    /// Every state sample recorded for `vehicle_id`, in insertion order.
    pub fn states_for(&self, vehicle_id: i64) -> Vec<StateRecord> {
        self.inner
            .lock()
            .states
            .iter()
            .filter(|s| s.vehicle_id == vehicle_id)
            .cloned()
            .collect()
    }

    /// Every alarm row, sorted by id.
    pub fn alarms(&self) -> Vec<Alarm> {
        self.inner.lock().alarms.values().cloned().collect()
    }

    /// Look up one travel by id.
    pub fn travel(&self, id: i64) -> Option<Travel> {
        self.inner.lock().travels.get(&id).cloned()
    }

    /// Every travel for `vehicle_id`, sorted by id.
    pub fn travels_for(&self, vehicle_id: i64) -> Vec<Travel> {
        self.inner
            .lock()
            .travels
            .values()
            .filter(|t| t.vehicle_id == vehicle_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn find_vehicles(&self) -> Result<Vec<Vehicle>> {
        Ok(self.inner.lock().vehicles.values().cloned().collect())
    }

    async fn find_latest_travel(
        &self,
        vehicle_id: i64,
        status: TravelStatus,
    ) -> Result<Option<Travel>> {
        Ok(self
            .inner
            .lock()
            .travels
            .values()
            .filter(|t| t.vehicle_id == vehicle_id && t.status == status)
            .max_by_key(|t| (t.created_at, t.id))
            .cloned())
    }

    async fn save_travel(&self, mut travel: Travel) -> Result<Travel> {
        let mut inner = self.inner.lock();
        let id = match travel.id {
            Some(id) => id,
            None => {
                inner.next_travel_id += 1;
                inner.next_travel_id
            }
        };
        inner.next_travel_id = inner.next_travel_id.max(id);
        travel.id = Some(id);
        inner.travels.insert(id, travel.clone());
        Ok(travel)
    }

    async fn save_state(&self, mut record: StateRecord) -> Result<StateRecord> {
        let mut inner = self.inner.lock();
        inner.next_state_id += 1;
        record.id = Some(inner.next_state_id);
        inner.states.push(record.clone());
        Ok(record)
    }

    async fn find_alarm_type(&self, criticity: &str) -> Result<Option<AlarmType>> {
        Ok(self
            .inner
            .lock()
            .alarm_types
            .values()
            .find(|t| t.criticity == criticity)
            .cloned())
    }

    async fn find_origin(&self, label: &str) -> Result<Option<Origin>> {
        Ok(self
            .inner
            .lock()
            .origins
            .values()
            .find(|o| o.label == label)
            .cloned())
    }

    async fn save_alarm(&self, mut alarm: Alarm) -> Result<Alarm> {
        let mut inner = self.inner.lock();
        inner.next_alarm_id += 1;
        let id = inner.next_alarm_id;
        alarm.id = Some(id);
        inner.alarms.insert(id, alarm.clone());
        Ok(alarm)
    }

    async fn find_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.inner.lock().nodes.values().cloned().collect())
    }

    async fn find_arcs(&self) -> Result<Vec<ArcRecord>> {
        Ok(self.inner.lock().arcs.values().cloned().collect())
    }
}

/// Bootstrap payload for a fresh store: map graph, alarm taxonomy and,
/// optionally, the vehicle roster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSeed {
    /// Vehicles to register.
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    /// Map nodes.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    /// Map arcs.
    #[serde(default)]
    pub arcs: Vec<ArcRecord>,
    /// Alarm type taxonomy.
    #[serde(default)]
    pub alarm_types: Vec<AlarmType>,
    /// Origin taxonomy.
    #[serde(default)]
    pub origins: Vec<Origin>,
}
