//! ---
//! agvs_section: "06-coordinator"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Per-vehicle state ingest workers."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agvs_common::time::from_epoch_seconds;
use agvs_metrics::CoordinatorMetrics;
use agvs_msg::VehicleState;
use agvs_store::{EventJournal, FleetEvent, FleetStore, StateRecord, TravelStatus};
use agvs_transport::{ChannelHandler, InboundMessage};

use crate::record_event;

/// Per-vehicle telemetry pipeline.
///
/// Each registered vehicle gets a dedicated worker draining a bounded queue,
/// so samples from one vehicle persist strictly in arrival order while
/// vehicles never serialize against each other. A full queue drops the
/// newest sample instead of stalling the dispatch loop.
pub struct TelemetryIngest {
    store: Arc<dyn FleetStore>,
    metrics: CoordinatorMetrics,
    journal: Option<Arc<EventJournal>>,
    queue_capacity: usize,
    workers: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl TelemetryIngest {
    /// Build an ingest with no vehicles registered yet.
    pub fn new(
        store: Arc<dyn FleetStore>,
        metrics: CoordinatorMetrics,
        journal: Option<Arc<EventJournal>>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            store,
            metrics,
            journal,
            queue_capacity: queue_capacity.max(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `vehicle_id`, spawning its worker and returning the handler to
    /// mount on the vehicle's state channel. Returns `None` when the vehicle
    /// is already registered; the existing pipeline keeps running.
    pub fn register(&self, vehicle_id: i64) -> Option<StateChannelHandler> {
        {
            let workers = self.workers.lock();
            if workers.contains_key(&vehicle_id) {
                return None;
            }
        }

        let (queue, inbox) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(run_worker(
            vehicle_id,
            inbox,
            self.store.clone(),
            self.metrics.clone(),
            self.journal.clone(),
        ));
        self.workers.lock().insert(vehicle_id, worker);

        Some(StateChannelHandler {
            vehicle_id,
            queue,
            metrics: self.metrics.clone(),
        })
    }

    /// Vehicles currently registered, sorted.
    pub fn registered_vehicles(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.workers.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Wait for every worker to drain and exit.
    ///
    /// Workers exit once their queue senders are gone, so the channel handlers
    /// must be dropped (the router torn down) before calling this.
    pub async fn join_workers(&self) {
        let workers: Vec<(i64, JoinHandle<()>)> = self.workers.lock().drain().collect();
        for (vehicle_id, worker) in workers {
            if let Err(err) = worker.await {
                warn!(vehicle = vehicle_id, error = %err, "telemetry worker join failed");
            }
        }
    }
}

/// Channel handler for one vehicle's state channel. Decodes the sample and
/// hands it to the vehicle's worker without blocking the dispatch loop.
pub struct StateChannelHandler {
    vehicle_id: i64,
    queue: mpsc::Sender<VehicleState>,
    metrics: CoordinatorMetrics,
}

#[async_trait]
impl ChannelHandler for StateChannelHandler {
    async fn handle(&self, message: InboundMessage) {
        let state: VehicleState = match agvs_msg::decode(&message.payload) {
            Ok(state) => state,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "undecodable state payload");
                return;
            }
        };
        if state.car_id != self.vehicle_id {
            warn!(
                channel = %message.channel,
                claimed = state.car_id,
                expected = self.vehicle_id,
                "state sample claims a different vehicle; dropping"
            );
            return;
        }

        match self.queue.try_send(state) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(vehicle = self.vehicle_id, "telemetry queue full; sample dropped");
                self.metrics.record_state_dropped(self.vehicle_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(vehicle = self.vehicle_id, "telemetry worker gone; sample dropped");
            }
        }
    }
}

async fn run_worker(
    vehicle_id: i64,
    mut inbox: mpsc::Receiver<VehicleState>,
    store: Arc<dyn FleetStore>,
    metrics: CoordinatorMetrics,
    journal: Option<Arc<EventJournal>>,
) {
    while let Some(state) = inbox.recv().await {
        persist_state(vehicle_id, state, &store, &metrics, &journal).await;
    }
    debug!(vehicle = vehicle_id, "telemetry worker drained");
}

/// Persist one sample and, when the vehicle reports the end of navigation,
/// complete its latest in-progress travel.
async fn persist_state(
    vehicle_id: i64,
    state: VehicleState,
    store: &Arc<dyn FleetStore>,
    metrics: &CoordinatorMetrics,
    journal: &Option<Arc<EventJournal>>,
) {
    let record = StateRecord {
        id: None,
        vehicle_id,
        x: state.x,
        y: state.y,
        angle: state.angle,
        speed: state.speed,
        is_navigating: state.is_navigating,
        obstacle_detected: state.obstacle_detected,
        reported_at: from_epoch_seconds(state.timestamp),
        recorded_at: Utc::now(),
    };
    if let Err(err) = store.save_state(record).await {
        warn!(vehicle = vehicle_id, error = %err, "state persist failed");
        return;
    }
    metrics.record_state(vehicle_id);
    record_event(
        journal,
        FleetEvent::StateRecorded {
            vehicle_id,
            x: state.x,
            y: state.y,
            navigating: state.is_navigating,
        },
    );

    if state.is_navigating {
        return;
    }
    match store
        .find_latest_travel(vehicle_id, TravelStatus::InProgress)
        .await
    {
        Ok(Some(mut travel)) => {
            travel.transition(TravelStatus::Completed);
            match store.save_travel(travel).await {
                Ok(travel) => {
                    metrics.record_travel_completed();
                    if let Some(travel_id) = travel.id {
                        record_event(
                            journal,
                            FleetEvent::TravelStatusChanged {
                                travel_id,
                                vehicle_id,
                                status: TravelStatus::Completed,
                            },
                        );
                    }
                    info!(vehicle = vehicle_id, travel = ?travel.id, "travel completed");
                }
                Err(err) => {
                    warn!(vehicle = vehicle_id, error = %err, "travel completion persist failed")
                }
            }
        }
        Ok(None) => {}
        Err(err) => warn!(vehicle = vehicle_id, error = %err, "travel lookup failed"),
    }
}
