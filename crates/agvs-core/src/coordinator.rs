//! ---
//! agvs_section: "06-coordinator"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Coordinator assembly and lifecycle."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agvs_common::config::AppConfig;
use agvs_metrics::CoordinatorMetrics;
use agvs_msg::topics;
use agvs_store::{EventJournal, FleetStore};
use agvs_transport::{run_dispatch_loop, Broker, InboundMessage, TopicRouter};

use crate::alerts::AlertChannelHandler;
use crate::correlator::{spawn_expiry_sweeper, CommandCorrelator};
use crate::snapshot::SnapshotChannelHandler;
use crate::telemetry::TelemetryIngest;
use crate::Result;

/// Assembles the coordinator: channel handlers, dispatch loop and expiry
/// sweep over one broker connection and one store.
pub struct FleetCoordinator;

impl FleetCoordinator {
    /// Register every handler, subscribe its channels, bind the vehicles the
    /// store already knows, and start the background tasks.
    ///
    /// Handlers are registered before their channels are subscribed, so a
    /// message racing the startup never finds a subscribed-but-unrouted
    /// channel.
    pub async fn start(
        config: &AppConfig,
        broker: Arc<dyn Broker>,
        inbound: mpsc::Receiver<InboundMessage>,
        store: Arc<dyn FleetStore>,
        metrics: CoordinatorMetrics,
        journal: Option<Arc<EventJournal>>,
    ) -> Result<CoordinatorHandle> {
        let router = Arc::new(TopicRouter::new());
        let (shutdown, _) = broadcast::channel(4);

        let correlator = Arc::new(CommandCorrelator::new(
            broker.clone(),
            store.clone(),
            metrics.clone(),
            journal.clone(),
        ));
        let telemetry = Arc::new(TelemetryIngest::new(
            store.clone(),
            metrics.clone(),
            journal.clone(),
            config.telemetry.queue_capacity,
        ));

        router.register(topics::API_RESPONSE, correlator.clone());
        broker.subscribe(topics::API_RESPONSE).await?;

        router.register(
            topics::ALERTS,
            Arc::new(AlertChannelHandler::new(
                store.clone(),
                metrics.clone(),
                journal.clone(),
            )),
        );
        broker.subscribe(topics::ALERTS).await?;

        router.register(
            topics::API_REQUEST,
            Arc::new(SnapshotChannelHandler::new(
                broker.clone(),
                store.clone(),
                metrics.clone(),
            )),
        );
        broker.subscribe(topics::API_REQUEST).await?;

        let vehicles = store.find_vehicles().await?;
        for vehicle in &vehicles {
            bind_vehicle(&telemetry, &router, &*broker, vehicle.id).await?;
        }
        info!(
            broker = broker.name(),
            vehicles = vehicles.len(),
            "coordinator channels bound"
        );

        let dispatch_task = tokio::spawn(run_dispatch_loop(
            router.clone(),
            inbound,
            shutdown.subscribe(),
        ));
        let sweeper_task = spawn_expiry_sweeper(
            correlator.clone(),
            config.correlator.pending_timeout,
            config.correlator.sweep_interval,
            shutdown.subscribe(),
        );

        Ok(CoordinatorHandle {
            broker,
            router,
            correlator,
            telemetry,
            shutdown,
            dispatch_task,
            sweeper_task,
        })
    }
}

/// Mount a state handler for `vehicle_id` and subscribe its channel. Returns
/// `false` when the vehicle was already bound.
async fn bind_vehicle(
    telemetry: &TelemetryIngest,
    router: &TopicRouter,
    broker: &dyn Broker,
    vehicle_id: i64,
) -> Result<bool> {
    let Some(handler) = telemetry.register(vehicle_id) else {
        return Ok(false);
    };
    router.register(topics::vehicle_state(vehicle_id), Arc::new(handler));
    broker.subscribe(&topics::vehicle_state(vehicle_id)).await?;
    Ok(true)
}

/// Running coordinator. Dropping the handle leaks the background tasks; call
/// [`CoordinatorHandle::shutdown`] to stop them and drain the pipelines.
pub struct CoordinatorHandle {
    broker: Arc<dyn Broker>,
    router: Arc<TopicRouter>,
    correlator: Arc<CommandCorrelator>,
    telemetry: Arc<TelemetryIngest>,
    shutdown: broadcast::Sender<()>,
    dispatch_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Issue a plan-route command. See [`CommandCorrelator::issue_plan_route`].
    pub async fn issue_plan_route(&self, vehicle_id: i64, waypoints: Vec<i64>) -> Result<String> {
        self.correlator.issue_plan_route(vehicle_id, waypoints).await
    }

    /// Cancel a vehicle's active travel. See [`CommandCorrelator::cancel_route`].
    pub async fn cancel_route(&self, vehicle_id: i64) -> Result<Option<i64>> {
        self.correlator.cancel_route(vehicle_id).await
    }

    /// Bind the state channel of a vehicle that appeared after startup.
    pub async fn register_vehicle(&self, vehicle_id: i64) -> Result<()> {
        if bind_vehicle(&self.telemetry, &self.router, &*self.broker, vehicle_id).await? {
            info!(vehicle = vehicle_id, "vehicle channels bound");
        } else {
            debug!(vehicle = vehicle_id, "vehicle already bound");
        }
        Ok(())
    }

    /// Number of commands currently awaiting a response.
    pub fn pending_commands(&self) -> usize {
        self.correlator.pending_len()
    }

    /// Stop the background tasks and drain the telemetry pipelines.
    pub async fn shutdown(self) -> Result<()> {
        // Receivers may already be gone if the inbound stream closed first.
        let _ = self.shutdown.send(());
        if let Err(err) = self.dispatch_task.await {
            warn!(error = %err, "dispatch loop join failed");
        }
        if let Err(err) = self.sweeper_task.await {
            warn!(error = %err, "expiry sweeper join failed");
        }
        // The dispatch loop's router reference is gone once the task joins;
        // dropping ours frees the handlers and closes the telemetry queues.
        drop(self.router);
        self.telemetry.join_workers().await;
        info!("coordinator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agvs_metrics::new_registry;
    use agvs_msg::VehicleState;
    use agvs_store::{MemoryStore, Vehicle};
    use agvs_transport::MemoryHub;

    fn test_metrics() -> CoordinatorMetrics {
        CoordinatorMetrics::new(new_registry()).expect("metrics build")
    }

    fn sample(car_id: i64) -> VehicleState {
        VehicleState {
            car_id,
            timestamp: 1_700_000_000.0,
            x: 0.5,
            y: 0.5,
            angle: 0.0,
            speed: 0.2,
            is_navigating: true,
            obstacle_detected: false,
        }
    }

    /// Ingest runs through the dispatch loop and a worker; poll until it lands.
    async fn wait_for_states(store: &MemoryStore, vehicle_id: i64, count: usize) {
        for _ in 0..100 {
            if store.states_for(vehicle_id).len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("vehicle {vehicle_id} states never reached {count}");
    }

    #[tokio::test]
    async fn start_binds_known_vehicles_and_drains_on_shutdown() {
        let hub = MemoryHub::new();
        let (broker, inbound) = hub.connect(64);
        let (peer, _peer_rx) = hub.connect(64);

        let store = Arc::new(MemoryStore::new());
        store.seed_vehicle(Vehicle::new(2));

        let handle = FleetCoordinator::start(
            &AppConfig::default(),
            Arc::new(broker),
            inbound,
            store.clone(),
            test_metrics(),
            None,
        )
        .await
        .expect("start coordinator");

        peer.publish(
            &topics::vehicle_state(2),
            agvs_msg::encode(&sample(2)).expect("encode state"),
        )
        .await
        .expect("publish state");
        wait_for_states(&store, 2, 1).await;

        // A vehicle unknown at startup is bound at runtime.
        handle.register_vehicle(3).await.expect("register vehicle");
        peer.publish(
            &topics::vehicle_state(3),
            agvs_msg::encode(&sample(3)).expect("encode state"),
        )
        .await
        .expect("publish state");
        wait_for_states(&store, 3, 1).await;

        handle.shutdown().await.expect("shutdown");

        assert_eq!(store.states_for(2).len(), 1);
        assert_eq!(store.states_for(3).len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_harmless() {
        let hub = MemoryHub::new();
        let (broker, inbound) = hub.connect(8);

        let store = Arc::new(MemoryStore::new());
        store.seed_vehicle(Vehicle::new(2));

        let handle = FleetCoordinator::start(
            &AppConfig::default(),
            Arc::new(broker),
            inbound,
            store,
            test_metrics(),
            None,
        )
        .await
        .expect("start coordinator");

        handle.register_vehicle(2).await.expect("re-register");
        assert_eq!(handle.pending_commands(), 0);
        handle.shutdown().await.expect("shutdown");
    }
}
