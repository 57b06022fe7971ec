//! ---
//! agvs_section: "04-fleet-store"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Fleet domain records."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One vehicle known to the supervision backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Vehicle id; also names the per-vehicle broker channels.
    pub id: i64,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl Vehicle {
    /// Construct an unnamed vehicle.
    pub fn new(id: i64) -> Self {
        Self { id, name: None }
    }
}

/// Lifecycle of a travel. `Pending → InProgress → Completed`, with
/// `Cancelled` reachable from either of the first two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelStatus {
    /// Requested, plan-route command not yet acknowledged.
    Pending,
    /// Acknowledged by the planner; vehicle is (or is about to start) driving.
    InProgress,
    /// Vehicle reported the end of navigation.
    Completed,
    /// Abandoned by operator action.
    Cancelled,
}

impl fmt::Display for TravelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TravelStatus::Pending => "pending",
            TravelStatus::InProgress => "in_progress",
            TravelStatus::Completed => "completed",
            TravelStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A requested multi-waypoint route assignment for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Travel {
    /// Storage id; `None` until first persisted.
    pub id: Option<i64>,
    /// Assigned vehicle.
    pub vehicle_id: i64,
    /// Current lifecycle state.
    pub status: TravelStatus,
    /// Ordered waypoint ids.
    pub waypoints: Vec<i64>,
    /// Creation time; the handlers pick the most recent travel by this field.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Travel {
    /// A fresh `Pending` travel created now.
    pub fn new(vehicle_id: i64, waypoints: Vec<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            vehicle_id,
            status: TravelStatus::Pending,
            waypoints,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`, stamping the update time.
    pub fn transition(&mut self, status: TravelStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// One immutable vehicle state sample. Append-only: samples are never
/// updated once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Storage id; `None` until first persisted.
    pub id: Option<i64>,
    /// Reporting vehicle.
    pub vehicle_id: i64,
    /// Position, metres.
    pub x: f64,
    /// Position, metres.
    pub y: f64,
    /// Heading, radians.
    pub angle: f64,
    /// Speed, metres per second.
    pub speed: f64,
    /// Whether the vehicle was executing a route when sampling.
    pub is_navigating: bool,
    /// Whether an obstacle was in view when sampling.
    pub obstacle_detected: bool,
    /// Vehicle-clock sample time.
    pub reported_at: DateTime<Utc>,
    /// Server-clock ingest time.
    pub recorded_at: DateTime<Utc>,
}

/// Alarm severity classification; alerts resolve against `criticity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmType {
    /// Storage id.
    pub id: i64,
    /// Human-readable type label.
    pub label: String,
    /// Severity key matched exactly against the alert `level` field
    /// (DEBUG, INFO, WARNING, ERROR, FATAL).
    pub criticity: String,
}

/// Known alert emitter; alerts resolve against `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    /// Storage id.
    pub id: i64,
    /// Emitter label matched exactly against the alert `origin` field.
    pub label: String,
}

/// Materialized alarm row. Unresolved taxonomy references stay `None`;
/// the alarm is created regardless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    /// Storage id; `None` until first persisted.
    pub id: Option<i64>,
    /// Resolved alarm type, when the alert level matched one.
    pub alarm_type_id: Option<i64>,
    /// Resolved origin, when the alert origin matched one.
    pub origin_id: Option<i64>,
    /// Alert message.
    pub description: String,
    /// Alert timestamp.
    pub raised_at: DateTime<Utc>,
}

/// One vertex of the map graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id.
    pub id: i64,
    /// Node classification.
    pub kind: i32,
    /// Position, metres.
    pub x: f64,
    /// Position, metres.
    pub y: f64,
}

/// One directed arc of the map graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcRecord {
    /// Arc id.
    pub id: i64,
    /// Source node.
    pub origin: i64,
    /// Destination node.
    pub target: i64,
    /// Traversal cost.
    pub weight: i64,
    /// Traffic rule attached to the arc.
    pub rule: i32,
}
