//! ---
//! agvs_section: "08-system-tests"
//! agvs_subsection: "scenario-tests"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "End-to-end coordinator scenarios over the in-memory hub."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use agvs_common::config::AppConfig;
use agvs_core::{CoordinatorHandle, FleetCoordinator};
use agvs_metrics::{new_registry, CoordinatorMetrics};
use agvs_msg::{
    topics, Action, CommandEnvelope, CommandResponse, FleetAlert, MapSnapshot, VehicleState,
};
use agvs_store::{
    AlarmType, ArcRecord, FleetStore, MemoryStore, NodeRecord, Origin, Travel, TravelStatus,
    Vehicle,
};
use agvs_transport::{Broker, InboundMessage, MemoryBroker, MemoryHub};

/// A coordinator plus one fleet-side peer endpoint standing in for the route
/// planner, the vehicles and an external API client.
struct World {
    handle: CoordinatorHandle,
    store: Arc<MemoryStore>,
    peer: MemoryBroker,
    peer_rx: mpsc::Receiver<InboundMessage>,
}

async fn boot(store: MemoryStore, peer_channels: &[String]) -> World {
    let hub = MemoryHub::new();
    let (broker, inbound) = hub.connect(64);
    let (peer, peer_rx) = hub.connect(64);
    for channel in peer_channels {
        peer.subscribe(channel).await.expect("peer subscribe");
    }

    let store = Arc::new(store);
    let metrics = CoordinatorMetrics::new(new_registry()).expect("metrics build");
    let handle = FleetCoordinator::start(
        &AppConfig::default(),
        Arc::new(broker),
        inbound,
        store.clone(),
        metrics,
        None,
    )
    .await
    .expect("start coordinator");

    World {
        handle,
        store,
        peer,
        peer_rx,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread")]
async fn plan_route_round_trip_starts_the_travel() {
    let store = MemoryStore::new();
    store.seed_vehicle(Vehicle::new(7));
    let mut world = boot(
        store,
        &[
            topics::ROUTE_PLANNER_REQUEST.to_owned(),
            topics::vehicle_command(7),
        ],
    )
    .await;
    world
        .store
        .save_travel(Travel::new(7, vec![3, 5]))
        .await
        .expect("seed travel");

    let command_id = world
        .handle
        .issue_plan_route(7, vec![3, 5])
        .await
        .expect("issue plan route");
    assert_eq!(world.handle.pending_commands(), 1);

    // The planner sees exactly one camelCase command envelope.
    let request = world.peer_rx.recv().await.expect("planner request");
    assert_eq!(request.channel, topics::ROUTE_PLANNER_REQUEST);
    let raw: serde_json::Value = serde_json::from_slice(&request.payload).expect("raw envelope");
    assert_eq!(raw["commandId"], command_id.as_str());
    assert_eq!(raw["action"], "PLAN_ROUTE_REQUEST");
    assert_eq!(raw["carId"], 7);
    assert_eq!(raw["nodeList"], serde_json::json!([3, 5]));
    assert_eq!(raw["replyTopic"], topics::API_RESPONSE);

    // Planner acknowledges on the shared reply channel.
    world
        .peer
        .publish(
            topics::API_RESPONSE,
            agvs_msg::encode(&CommandResponse::ok(command_id)).expect("encode response"),
        )
        .await
        .expect("publish response");

    let store = world.store.clone();
    wait_until("travel to start", || {
        store.travels_for(7)[0].status == TravelStatus::InProgress
    })
    .await;
    assert_eq!(world.handle.pending_commands(), 0);

    // The vehicle is told to begin driving.
    let start = world.peer_rx.recv().await.expect("start command");
    assert_eq!(start.channel, topics::vehicle_command(7));
    let envelope: CommandEnvelope = agvs_msg::decode(&start.payload).expect("decode start");
    assert_eq!(envelope.action, Action::StartRoute);
    assert_eq!(envelope.car_id, 7);
    assert!(envelope.node_list.is_empty());

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_plan_response_leaves_travel_pending() {
    let store = MemoryStore::new();
    store.seed_vehicle(Vehicle::new(7));
    let mut world = boot(store, &[topics::ROUTE_PLANNER_REQUEST.to_owned()]).await;
    world
        .store
        .save_travel(Travel::new(7, vec![3]))
        .await
        .expect("seed travel");

    let command_id = world
        .handle
        .issue_plan_route(7, vec![3])
        .await
        .expect("issue plan route");
    let _ = world.peer_rx.recv().await.expect("planner request");

    world
        .peer
        .publish(
            topics::API_RESPONSE,
            agvs_msg::encode(&CommandResponse::fail(command_id, "no path found"))
                .expect("encode response"),
        )
        .await
        .expect("publish response");

    let handle = &world.handle;
    wait_until("pending entry removal", || handle.pending_commands() == 0).await;
    assert_eq!(world.store.travels_for(7)[0].status, TravelStatus::Pending);

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn telemetry_persists_in_arrival_order_and_completes_travel() {
    let store = MemoryStore::new();
    store.seed_vehicle(Vehicle::new(2));
    let world = boot(store, &[]).await;
    let mut travel = Travel::new(2, vec![1, 4]);
    travel.transition(TravelStatus::InProgress);
    world.store.save_travel(travel).await.expect("seed travel");

    let sample = |timestamp: f64, navigating: bool| VehicleState {
        car_id: 2,
        timestamp,
        x: 0.0,
        y: 0.0,
        angle: 0.0,
        speed: 0.3,
        is_navigating: navigating,
        obstacle_detected: false,
    };

    // Embedded clocks run backwards; arrival order must win.
    for state in [sample(100.0, true), sample(99.0, true), sample(98.5, false)] {
        world
            .peer
            .publish(
                &topics::vehicle_state(2),
                agvs_msg::encode(&state).expect("encode state"),
            )
            .await
            .expect("publish state");
    }

    let store = world.store.clone();
    wait_until("all samples to persist", || store.states_for(2).len() == 3).await;
    let states = store.states_for(2);
    assert_eq!(
        states
            .iter()
            .map(|s| s.reported_at.timestamp())
            .collect::<Vec<_>>(),
        vec![100, 99, 98]
    );

    wait_until("travel completion", || {
        store.travels_for(2)[0].status == TravelStatus::Completed
    })
    .await;

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_transitions_travel_and_notifies_vehicle() {
    let store = MemoryStore::new();
    store.seed_vehicle(Vehicle::new(4));
    let mut world = boot(store, &[topics::vehicle_command(4)]).await;
    let mut travel = Travel::new(4, vec![9]);
    travel.transition(TravelStatus::InProgress);
    world.store.save_travel(travel).await.expect("seed travel");

    let cancelled = world.handle.cancel_route(4).await.expect("cancel");
    assert!(cancelled.is_some());
    assert_eq!(world.store.travels_for(4)[0].status, TravelStatus::Cancelled);

    let command = world.peer_rx.recv().await.expect("cancel command");
    assert_eq!(command.channel, topics::vehicle_command(4));
    let envelope: CommandEnvelope = agvs_msg::decode(&command.payload).expect("decode cancel");
    assert_eq!(envelope.action, Action::CancelVehicleRoute);

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn alerts_materialize_alarms_with_best_effort_references() {
    let store = MemoryStore::new();
    store.seed_alarm_type(AlarmType {
        id: 1,
        label: "High severity".to_owned(),
        criticity: "ERROR".to_owned(),
    });
    store.seed_origin(Origin {
        id: 2,
        label: "lidar".to_owned(),
    });
    let world = boot(store, &[]).await;

    for alert in [
        FleetAlert {
            origin: "lidar".to_owned(),
            timestamp: 1_700_000_000.0,
            level: "ERROR".to_owned(),
            message: "obstacle persisted".to_owned(),
        },
        FleetAlert {
            origin: "unknown-emitter".to_owned(),
            timestamp: 1_700_000_001.0,
            level: "WHISPER".to_owned(),
            message: "uncatalogued event".to_owned(),
        },
    ] {
        world
            .peer
            .publish(
                topics::ALERTS,
                agvs_msg::encode(&alert).expect("encode alert"),
            )
            .await
            .expect("publish alert");
    }

    let store = world.store.clone();
    wait_until("alarm rows", || store.alarms().len() == 2).await;
    let alarms = store.alarms();
    let resolved = alarms
        .iter()
        .find(|a| a.description == "obstacle persisted")
        .expect("resolved alarm");
    assert_eq!(resolved.alarm_type_id, Some(1));
    assert_eq!(resolved.origin_id, Some(2));
    let unresolved = alarms
        .iter()
        .find(|a| a.description == "uncatalogued event")
        .expect("unresolved alarm");
    assert_eq!(unresolved.alarm_type_id, None);
    assert_eq!(unresolved.origin_id, None);

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn map_request_round_trip_serves_the_graph() {
    let store = MemoryStore::new();
    store.seed_node(NodeRecord {
        id: 1,
        kind: 0,
        x: 0.0,
        y: 0.0,
    });
    store.seed_node(NodeRecord {
        id: 2,
        kind: 1,
        x: 3.0,
        y: 1.0,
    });
    store.seed_arc(ArcRecord {
        id: 1,
        origin: 1,
        target: 2,
        weight: 5,
        rule: 0,
    });
    let mut world = boot(store, &["client/reply".to_owned()]).await;

    let request = CommandEnvelope::new(Action::GetMapRequest, 0, Vec::new(), "client/reply");
    world
        .peer
        .publish(
            topics::API_REQUEST,
            agvs_msg::encode(&request).expect("encode request"),
        )
        .await
        .expect("publish request");

    let reply = world.peer_rx.recv().await.expect("snapshot reply");
    assert_eq!(reply.channel, "client/reply");
    let snapshot: MapSnapshot = agvs_msg::decode(&reply.payload).expect("decode snapshot");
    assert_eq!(snapshot.command_id, request.command_id);
    assert!(snapshot.success);
    assert_eq!(snapshot.nodes.len(), 2);
    assert_eq!(snapshot.nodes[0].edges.len(), 1);
    assert_eq!(snapshot.nodes[0].edges[0].target, 2);
    assert_eq!(snapshot.nodes[0].edges[0].weight, 5);
    assert!(snapshot.nodes[1].edges.is_empty());

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_request_action_is_rejected_by_name() {
    let mut world = boot(MemoryStore::new(), &["client/reply".to_owned()]).await;

    let request = CommandEnvelope::new(
        Action::from("OPEN_POD_BAY_DOORS".to_owned()),
        0,
        Vec::new(),
        "client/reply",
    );
    world
        .peer
        .publish(
            topics::API_REQUEST,
            agvs_msg::encode(&request).expect("encode request"),
        )
        .await
        .expect("publish request");

    let reply = world.peer_rx.recv().await.expect("failure reply");
    let response: CommandResponse = agvs_msg::decode(&reply.payload).expect("decode response");
    assert_eq!(response.command_id, request.command_id);
    assert!(!response.success);
    assert!(response
        .message
        .expect("failure message")
        .contains("OPEN_POD_BAY_DOORS"));

    world.handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_response_after_restart_is_ignored() {
    let store = MemoryStore::new();
    store.seed_vehicle(Vehicle::new(7));
    let world = boot(store, &[]).await;
    world
        .store
        .save_travel(Travel::new(7, vec![3]))
        .await
        .expect("seed travel");

    world
        .peer
        .publish(
            topics::API_RESPONSE,
            agvs_msg::encode(&CommandResponse::ok("PLAN_ROUTE_REQUEST-previous-incarnation"))
                .expect("encode response"),
        )
        .await
        .expect("publish response");

    // Give the dispatch loop time to route the stray response.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(world.store.travels_for(7)[0].status, TravelStatus::Pending);
    assert_eq!(world.handle.pending_commands(), 0);

    world.handle.shutdown().await.expect("shutdown");
}
