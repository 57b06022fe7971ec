//! ---
//! agvs_section: "06-coordinator"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Outstanding-command bookkeeping and response matching."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use agvs_metrics::CoordinatorMetrics;
use agvs_msg::{topics, Action, CommandEnvelope, CommandResponse};
use agvs_store::{EventJournal, FleetEvent, FleetStore, TravelStatus};
use agvs_transport::{Broker, ChannelHandler, InboundMessage};

use crate::{record_event, Result};

/// One outstanding command awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Correlation id the response must echo.
    pub id: String,
    /// Command kind the id was minted for.
    pub action: Action,
    /// Target vehicle.
    pub vehicle_id: i64,
    /// Ordered waypoint ids carried by the command.
    pub waypoints: Vec<i64>,
    /// Channel the response is expected on.
    pub reply_channel: String,
    /// Monotonic issuance instant; drives expiry.
    pub issued_at: Instant,
    /// Wall-clock issuance time for logs and the journal.
    pub issued_wall: DateTime<Utc>,
}

/// Issues commands with unique correlation ids, tracks them as pending, and
/// applies travel transitions when matching responses arrive.
///
/// The pending set is owned exclusively by this type behind a lock; issuance,
/// matching and sweeping all serialize on it, and the lock is never held
/// across an await point. Registered on the shared response channel as a
/// [`ChannelHandler`].
pub struct CommandCorrelator {
    broker: Arc<dyn Broker>,
    store: Arc<dyn FleetStore>,
    pending: Mutex<HashMap<String, PendingCommand>>,
    metrics: CoordinatorMetrics,
    journal: Option<Arc<EventJournal>>,
}

impl CommandCorrelator {
    /// Build a correlator with an empty pending set.
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn FleetStore>,
        metrics: CoordinatorMetrics,
        journal: Option<Arc<EventJournal>>,
    ) -> Self {
        Self {
            broker,
            store,
            pending: Mutex::new(HashMap::new()),
            metrics,
            journal,
        }
    }

    /// Publish a plan-route command for `vehicle_id` and register it as
    /// pending. Returns the correlation id immediately after the publish;
    /// the response arrives asynchronously on the shared reply channel.
    ///
    /// The entry is inserted before the publish so a response racing the
    /// registration still matches; a failed publish removes it again and
    /// surfaces the error.
    pub async fn issue_plan_route(&self, vehicle_id: i64, waypoints: Vec<i64>) -> Result<String> {
        let envelope = CommandEnvelope::new(
            Action::PlanRouteRequest,
            vehicle_id,
            waypoints.clone(),
            topics::API_RESPONSE,
        );
        let payload = agvs_msg::encode(&envelope)?;
        let id = envelope.command_id.clone();

        let command = PendingCommand {
            id: id.clone(),
            action: Action::PlanRouteRequest,
            vehicle_id,
            waypoints,
            reply_channel: topics::API_RESPONSE.to_owned(),
            issued_at: Instant::now(),
            issued_wall: Utc::now(),
        };
        {
            let mut pending = self.pending.lock();
            pending.insert(id.clone(), command.clone());
            self.metrics.set_pending(pending.len());
        }

        if let Err(err) = self
            .broker
            .publish(topics::ROUTE_PLANNER_REQUEST, payload)
            .await
        {
            let mut pending = self.pending.lock();
            pending.remove(&id);
            self.metrics.set_pending(pending.len());
            warn!(command = %id, vehicle = vehicle_id, error = %err, "plan route publish failed");
            return Err(err.into());
        }

        self.metrics.record_command(Action::PlanRouteRequest.as_wire());
        record_event(
            &self.journal,
            FleetEvent::CommandIssued {
                command_id: id.clone(),
                action: Action::PlanRouteRequest.as_wire().to_owned(),
                vehicle_id,
                waypoints: command.waypoints,
            },
        );
        debug!(command = %id, vehicle = vehicle_id, "plan route command published");
        Ok(id)
    }

    /// Cancel the vehicle's active travel, preferring `InProgress` over
    /// `Pending`, and tell the vehicle to abandon its route. The cancel
    /// command expects no response, so nothing is registered as pending.
    ///
    /// Returns the cancelled travel's id, or `None` when the vehicle has
    /// nothing to cancel.
    pub async fn cancel_route(&self, vehicle_id: i64) -> Result<Option<i64>> {
        let travel = match self
            .store
            .find_latest_travel(vehicle_id, TravelStatus::InProgress)
            .await?
        {
            Some(travel) => Some(travel),
            None => {
                self.store
                    .find_latest_travel(vehicle_id, TravelStatus::Pending)
                    .await?
            }
        };
        let Some(mut travel) = travel else {
            debug!(vehicle = vehicle_id, "no active travel to cancel");
            return Ok(None);
        };

        travel.transition(TravelStatus::Cancelled);
        let travel = self.store.save_travel(travel).await?;
        self.metrics.record_travel_cancelled();
        if let Some(travel_id) = travel.id {
            record_event(
                &self.journal,
                FleetEvent::TravelStatusChanged {
                    travel_id,
                    vehicle_id,
                    status: TravelStatus::Cancelled,
                },
            );
        }

        let envelope = CommandEnvelope::new(
            Action::CancelVehicleRoute,
            vehicle_id,
            Vec::new(),
            topics::API_RESPONSE,
        );
        let payload = agvs_msg::encode(&envelope)?;
        self.metrics.record_command(Action::CancelVehicleRoute.as_wire());
        if let Err(err) = self
            .broker
            .publish(&topics::vehicle_command(vehicle_id), payload)
            .await
        {
            // Travel is already cancelled locally; the vehicle will learn on
            // its next command cycle.
            warn!(vehicle = vehicle_id, error = %err, "cancel command publish failed");
        }
        info!(vehicle = vehicle_id, travel = ?travel.id, "travel cancelled");
        Ok(travel.id)
    }

    /// Number of commands currently awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Evict every pending command older than `timeout`, returning the
    /// evicted entries. Each eviction emits a timeout event; the travel
    /// behind the command stays `Pending` for operator action.
    pub fn sweep_expired(&self, timeout: Duration) -> Vec<PendingCommand> {
        let expired: Vec<PendingCommand> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, command)| command.issued_at.elapsed() >= timeout)
                .map(|(id, _)| id.clone())
                .collect();
            let expired: Vec<PendingCommand> =
                ids.iter().filter_map(|id| pending.remove(id)).collect();
            if !expired.is_empty() {
                self.metrics.set_pending(pending.len());
            }
            expired
        };

        for command in &expired {
            warn!(
                command = %command.id,
                vehicle = command.vehicle_id,
                issued_at = %command.issued_wall,
                "command timed out; evicting pending entry"
            );
            self.metrics.record_expired(command.action.as_wire());
            record_event(
                &self.journal,
                FleetEvent::CommandExpired {
                    command_id: command.id.clone(),
                    action: command.action.as_wire().to_owned(),
                    vehicle_id: command.vehicle_id,
                },
            );
        }
        expired
    }

    /// Match one response against the pending set and apply its side effects.
    ///
    /// The entry is removed under the lock before anything else happens,
    /// which makes the success side effect at-most-once: duplicates and
    /// unknown ids find nothing and stop.
    async fn handle_response(&self, response: CommandResponse) {
        let matched = {
            let mut pending = self.pending.lock();
            let matched = pending.remove(&response.command_id);
            if matched.is_some() {
                self.metrics.set_pending(pending.len());
            }
            matched
        };

        let Some(command) = matched else {
            debug!(command = %response.command_id, "response matched no pending command");
            self.metrics.record_unmatched_response();
            return;
        };

        self.metrics
            .record_response(command.action.as_wire(), response.success);

        if !response.success {
            warn!(
                command = %command.id,
                vehicle = command.vehicle_id,
                reason = response.message.as_deref().unwrap_or("unspecified"),
                "command rejected; travel left pending"
            );
            return;
        }

        match command.action {
            Action::PlanRouteRequest => self.start_planned_travel(&command).await,
            ref other => {
                debug!(command = %command.id, action = %other, "response acknowledged; no follow-up")
            }
        }
    }

    /// Success side effect for an acknowledged plan-route command: move the
    /// vehicle's most recent `Pending` travel to `InProgress` and send the
    /// fire-and-forget start command on the vehicle's own channel.
    async fn start_planned_travel(&self, command: &PendingCommand) {
        let travel = match self
            .store
            .find_latest_travel(command.vehicle_id, TravelStatus::Pending)
            .await
        {
            Ok(Some(travel)) => travel,
            Ok(None) => {
                warn!(
                    command = %command.id,
                    vehicle = command.vehicle_id,
                    "plan route acknowledged but no pending travel found"
                );
                return;
            }
            Err(err) => {
                warn!(command = %command.id, vehicle = command.vehicle_id, error = %err, "travel lookup failed");
                return;
            }
        };

        let mut travel = travel;
        travel.transition(TravelStatus::InProgress);
        let travel = match self.store.save_travel(travel).await {
            Ok(travel) => travel,
            Err(err) => {
                warn!(command = %command.id, vehicle = command.vehicle_id, error = %err, "travel update failed");
                return;
            }
        };
        if let Some(travel_id) = travel.id {
            record_event(
                &self.journal,
                FleetEvent::TravelStatusChanged {
                    travel_id,
                    vehicle_id: command.vehicle_id,
                    status: TravelStatus::InProgress,
                },
            );
        }
        info!(
            command = %command.id,
            vehicle = command.vehicle_id,
            travel = ?travel.id,
            "travel started"
        );

        let start = CommandEnvelope::new(
            Action::StartRoute,
            command.vehicle_id,
            Vec::new(),
            topics::API_RESPONSE,
        );
        let payload = match agvs_msg::encode(&start) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(vehicle = command.vehicle_id, error = %err, "start command encode failed");
                return;
            }
        };
        self.metrics.record_command(Action::StartRoute.as_wire());
        if let Err(err) = self
            .broker
            .publish(&topics::vehicle_command(command.vehicle_id), payload)
            .await
        {
            warn!(vehicle = command.vehicle_id, error = %err, "start command publish failed");
        }
    }
}

#[async_trait]
impl ChannelHandler for CommandCorrelator {
    async fn handle(&self, message: InboundMessage) {
        let response: CommandResponse = match agvs_msg::decode(&message.payload) {
            Ok(response) => response,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "undecodable response payload");
                return;
            }
        };
        self.handle_response(response).await;
    }
}

/// Spawn the periodic expiry sweep for `correlator`.
pub fn spawn_expiry_sweeper(
    correlator: Arc<CommandCorrelator>,
    timeout: Duration,
    sweep_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("expiry sweeper shutdown received");
                    break;
                }
                _ = ticker.tick() => {
                    correlator.sweep_expired(timeout);
                }
            }
        }
    })
}
