//! ---
//! agvs_section: "02-fleet-protocol"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "JSON payload shapes exchanged with the fleet."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Symbolic command kinds understood across the fleet.
///
/// The wire encoding is the upper-snake action string; values outside the
/// known vocabulary are preserved verbatim in [`Action::Unknown`] so handlers
/// can name them when rejecting a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Ask the route planner to compute a route through a waypoint list.
    PlanRouteRequest,
    /// Planner-to-vehicle waypoint handoff. Not issued by the coordinator.
    SetWaypointsRequest,
    /// Tell a vehicle to begin executing its planned route.
    StartRoute,
    /// Tell a vehicle to abandon its current route.
    CancelVehicleRoute,
    /// Ask for a snapshot of the current node/arc graph.
    GetMapRequest,
    /// Any action string outside the known vocabulary.
    Unknown(String),
}

impl Action {
    /// The action string as it appears on the wire.
    pub fn as_wire(&self) -> &str {
        match self {
            Action::PlanRouteRequest => "PLAN_ROUTE_REQUEST",
            Action::SetWaypointsRequest => "SET_WAYPOINTS_REQUEST",
            Action::StartRoute => "START_ROUTE",
            Action::CancelVehicleRoute => "CANCEL_VEHICLE_ROUTE_REQUEST",
            Action::GetMapRequest => "GET_MAP_REQUEST",
            Action::Unknown(other) => other,
        }
    }

    /// Build a correlation id for a command of this kind.
    ///
    /// The action prefix keeps broker captures and logs greppable; the UUID
    /// suffix carries the uniqueness.
    pub fn correlation_id(&self) -> String {
        format!("{}-{}", self.as_wire(), Uuid::new_v4())
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PLAN_ROUTE_REQUEST" => Action::PlanRouteRequest,
            "SET_WAYPOINTS_REQUEST" => Action::SetWaypointsRequest,
            "START_ROUTE" => Action::StartRoute,
            "CANCEL_VEHICLE_ROUTE_REQUEST" => Action::CancelVehicleRoute,
            "GET_MAP_REQUEST" => Action::GetMapRequest,
            _ => Action::Unknown(value),
        }
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.as_wire().to_owned()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Command published towards the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Opaque correlation id echoed back by the eventual response.
    pub command_id: String,
    /// Command kind.
    pub action: Action,
    /// Target vehicle.
    pub car_id: i64,
    /// Ordered waypoint ids; empty for commands without a route payload.
    #[serde(default)]
    pub node_list: Vec<i64>,
    /// Channel the receiver should publish its response on.
    pub reply_topic: String,
}

impl CommandEnvelope {
    /// Build a command with a fresh correlation id.
    pub fn new(
        action: Action,
        car_id: i64,
        node_list: Vec<i64>,
        reply_topic: impl Into<String>,
    ) -> Self {
        Self {
            command_id: action.correlation_id(),
            action,
            car_id,
            node_list,
            reply_topic: reply_topic.into(),
        }
    }
}

/// Response to a previously issued command.
///
/// Peers may attach richer payloads (planned node ids and the like); anything
/// beyond these fields is ignored on parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Correlation id of the command being answered.
    pub command_id: String,
    /// Whether the command was accepted/executed.
    pub success: bool,
    /// Optional human-readable detail, usually present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    /// Successful response for the given correlation id.
    pub fn ok(command_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            message: None,
        }
    }

    /// Failure response carrying a diagnostic message.
    pub fn fail(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Position/state sample published by one vehicle on its state channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    /// Reporting vehicle.
    pub car_id: i64,
    /// Vehicle-local epoch timestamp, seconds. Informational only: ingest
    /// order follows transport arrival order, never this value.
    pub timestamp: f64,
    /// Position, metres.
    pub x: f64,
    /// Position, metres.
    pub y: f64,
    /// Heading, radians.
    pub angle: f64,
    /// Speed, metres per second.
    pub speed: f64,
    /// Whether the vehicle is currently executing a route.
    pub is_navigating: bool,
    /// Whether the vehicle's sensors currently see an obstacle.
    pub obstacle_detected: bool,
}

/// Fleet-wide alert event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAlert {
    /// Free-text emitter label, matched against the origin taxonomy.
    pub origin: String,
    /// Emitter-local epoch timestamp, seconds.
    pub timestamp: f64,
    /// Severity label (DEBUG, INFO, WARNING, ERROR, FATAL), matched against
    /// the alarm-type taxonomy.
    pub level: String,
    /// Alert description.
    pub message: String,
}

/// One outgoing edge of a map node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapEdge {
    /// Destination node id.
    pub target: i64,
    /// Traversal cost.
    pub weight: i64,
    /// Traffic rule attached to the arc.
    pub rule: i32,
}

/// One node of the map graph, with its outgoing edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapNode {
    /// Node id.
    pub id: i64,
    /// Node classification.
    #[serde(rename = "type")]
    pub kind: i32,
    /// Position, metres.
    pub x: f64,
    /// Position, metres.
    pub y: f64,
    /// Outgoing edges.
    #[serde(default)]
    pub edges: Vec<MapEdge>,
}

/// Successful answer to a map snapshot request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSnapshot {
    /// Correlation id of the request being answered.
    pub command_id: String,
    /// Always true on this shape; failures travel as [`CommandResponse`].
    pub success: bool,
    /// Snapshot wall time, whole seconds.
    pub timestamp_sec: i64,
    /// Snapshot wall time, nanosecond remainder.
    pub timestamp_nsec: i32,
    /// Every node of the graph with its outgoing edges.
    pub nodes: Vec<MapNode>,
}

impl MapSnapshot {
    /// Assemble a snapshot answering `command_id` at the given wall time.
    pub fn new(
        command_id: impl Into<String>,
        timestamp_sec: i64,
        timestamp_nsec: i32,
        nodes: Vec<MapNode>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            timestamp_sec,
            timestamp_nsec,
            nodes,
        }
    }
}
