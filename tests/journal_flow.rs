//! ---
//! agvs_section: "08-system-tests"
//! agvs_subsection: "scenario-tests"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Event journal contents after a full command cycle."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use agvs_common::config::AppConfig;
use agvs_core::FleetCoordinator;
use agvs_metrics::{new_registry, CoordinatorMetrics};
use agvs_msg::{topics, CommandResponse, VehicleState};
use agvs_store::{
    EventJournal, FleetEvent, FleetStore, JournalReader, MemoryStore, Travel, TravelStatus, Vehicle,
};
use agvs_transport::{Broker, MemoryHub};

#[tokio::test(flavor = "multi_thread")]
async fn command_cycle_is_journalled_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fleet-events.log");
    let journal = Arc::new(EventJournal::open(&path).expect("open journal"));

    let hub = MemoryHub::new();
    let (broker, inbound) = hub.connect(16);
    let (peer, mut peer_rx) = hub.connect(16);
    peer.subscribe(topics::ROUTE_PLANNER_REQUEST)
        .await
        .expect("peer subscribe");

    let store = Arc::new(MemoryStore::new());
    store.seed_vehicle(Vehicle::new(7));
    store
        .save_travel(Travel::new(7, vec![3, 5]))
        .await
        .expect("seed travel");

    let handle = FleetCoordinator::start(
        &AppConfig::default(),
        Arc::new(broker),
        inbound,
        store.clone(),
        CoordinatorMetrics::new(new_registry()).expect("metrics build"),
        Some(journal),
    )
    .await
    .expect("start coordinator");

    let command_id = handle
        .issue_plan_route(7, vec![3, 5])
        .await
        .expect("issue plan route");
    let _ = peer_rx.recv().await.expect("planner request");
    peer.publish(
        topics::API_RESPONSE,
        agvs_msg::encode(&CommandResponse::ok(command_id.clone())).expect("encode response"),
    )
    .await
    .expect("publish response");

    let state = VehicleState {
        car_id: 7,
        timestamp: 1_700_000_000.0,
        x: 1.0,
        y: 2.0,
        angle: 0.0,
        speed: 0.4,
        is_navigating: true,
        obstacle_detected: false,
    };
    peer.publish(
        &topics::vehicle_state(7),
        agvs_msg::encode(&state).expect("encode state"),
    )
    .await
    .expect("publish state");

    for _ in 0..200 {
        if store.travels_for(7)[0].status == TravelStatus::InProgress
            && store.states_for(7).len() == 1
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await.expect("shutdown");

    let entries: Vec<_> = JournalReader::open(&path)
        .expect("open reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("parse entries");
    assert!(!entries.is_empty());

    // Sequences are gapless from 1.
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=entries.len() as u64).collect::<Vec<_>>());

    let issued = entries
        .iter()
        .position(|e| {
            matches!(
                &e.event,
                FleetEvent::CommandIssued {
                    command_id: id,
                    vehicle_id: 7,
                    ..
                } if *id == command_id
            )
        })
        .expect("command issued entry");
    let started = entries
        .iter()
        .position(|e| {
            matches!(
                e.event,
                FleetEvent::TravelStatusChanged {
                    vehicle_id: 7,
                    status: TravelStatus::InProgress,
                    ..
                }
            )
        })
        .expect("travel started entry");
    assert!(issued < started);

    assert!(entries.iter().any(|e| {
        matches!(
            e.event,
            FleetEvent::StateRecorded {
                vehicle_id: 7,
                navigating: true,
                ..
            }
        )
    }));
}

#[tokio::test(flavor = "multi_thread")]
async fn journal_survives_a_coordinator_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fleet-events.log");

    let store = Arc::new(MemoryStore::new());
    store.seed_vehicle(Vehicle::new(2));
    store
        .save_travel(Travel::new(2, vec![4]))
        .await
        .expect("seed travel");

    for _ in 0..2 {
        let journal = Arc::new(EventJournal::open(&path).expect("open journal"));
        let hub = MemoryHub::new();
        let (broker, inbound) = hub.connect(16);

        let handle = FleetCoordinator::start(
            &AppConfig::default(),
            Arc::new(broker),
            inbound,
            store.clone(),
            CoordinatorMetrics::new(new_registry()).expect("metrics build"),
            Some(journal),
        )
        .await
        .expect("start coordinator");

        handle
            .issue_plan_route(2, vec![4])
            .await
            .expect("issue plan route");
        handle.shutdown().await.expect("shutdown");
    }

    let entries: Vec<_> = JournalReader::open(&path)
        .expect("open reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("parse entries");
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert!(entries
        .iter()
        .all(|e| matches!(e.event, FleetEvent::CommandIssued { vehicle_id: 2, .. })));
}
