//! ---
//! agvs_section: "06-coordinator"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Map snapshot request handling."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use agvs_common::time::wall_clock_parts;
use agvs_metrics::CoordinatorMetrics;
use agvs_msg::{Action, CommandEnvelope, CommandResponse, MapEdge, MapNode, MapSnapshot};
use agvs_store::{ArcRecord, FleetStore, NodeRecord};
use agvs_transport::{Broker, ChannelHandler, InboundMessage};

/// Channel handler for the shared request channel.
///
/// Serves `GET_MAP_REQUEST` with the current node/arc graph on the envelope's
/// reply channel; any other action gets a failure response naming it. Every
/// request is answered on the requested channel, including store failures.
pub struct SnapshotChannelHandler {
    broker: Arc<dyn Broker>,
    store: Arc<dyn FleetStore>,
    metrics: CoordinatorMetrics,
}

impl SnapshotChannelHandler {
    /// Build the handler over the given broker and store.
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn FleetStore>,
        metrics: CoordinatorMetrics,
    ) -> Self {
        Self {
            broker,
            store,
            metrics,
        }
    }
}

#[async_trait]
impl ChannelHandler for SnapshotChannelHandler {
    async fn handle(&self, message: InboundMessage) {
        let envelope: CommandEnvelope = match agvs_msg::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "undecodable request payload");
                return;
            }
        };

        match envelope.action {
            Action::GetMapRequest => {
                // Graph assembly runs off the dispatch loop.
                tokio::spawn(serve_map(
                    envelope,
                    self.broker.clone(),
                    self.store.clone(),
                    self.metrics.clone(),
                ));
            }
            ref other => {
                warn!(
                    command = %envelope.command_id,
                    action = %other,
                    "unrecognized action on the request channel"
                );
                let response = CommandResponse::fail(
                    envelope.command_id.clone(),
                    format!("unrecognized action: {other}"),
                );
                publish_reply(&*self.broker, &envelope.reply_topic, &response).await;
            }
        }
    }
}

async fn serve_map(
    envelope: CommandEnvelope,
    broker: Arc<dyn Broker>,
    store: Arc<dyn FleetStore>,
    metrics: CoordinatorMetrics,
) {
    let (nodes, arcs) = match tokio::try_join!(store.find_nodes(), store.find_arcs()) {
        Ok(graph) => graph,
        Err(err) => {
            warn!(command = %envelope.command_id, error = %err, "map graph lookup failed");
            let response =
                CommandResponse::fail(envelope.command_id.clone(), "map graph unavailable");
            publish_reply(&*broker, &envelope.reply_topic, &response).await;
            metrics.record_map_snapshot_failure();
            return;
        }
    };

    let (timestamp_sec, timestamp_nsec) = wall_clock_parts(Utc::now());
    let snapshot = MapSnapshot::new(
        envelope.command_id.clone(),
        timestamp_sec,
        timestamp_nsec,
        assemble_nodes(&nodes, &arcs),
    );

    let payload = match agvs_msg::encode(&snapshot) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(command = %envelope.command_id, error = %err, "snapshot encode failed");
            metrics.record_map_snapshot_failure();
            return;
        }
    };
    match broker.publish(&envelope.reply_topic, payload).await {
        Ok(()) => {
            metrics.record_map_snapshot();
            debug!(
                command = %envelope.command_id,
                nodes = snapshot.nodes.len(),
                "map snapshot served"
            );
        }
        Err(err) => {
            warn!(command = %envelope.command_id, error = %err, "snapshot publish failed");
            metrics.record_map_snapshot_failure();
        }
    }
}

/// Pair every node with its outgoing arcs.
fn assemble_nodes(nodes: &[NodeRecord], arcs: &[ArcRecord]) -> Vec<MapNode> {
    nodes
        .iter()
        .map(|node| MapNode {
            id: node.id,
            kind: node.kind,
            x: node.x,
            y: node.y,
            edges: arcs
                .iter()
                .filter(|arc| arc.origin == node.id)
                .map(|arc| MapEdge {
                    target: arc.target,
                    weight: arc.weight,
                    rule: arc.rule,
                })
                .collect(),
        })
        .collect()
}

async fn publish_reply(broker: &dyn Broker, channel: &str, response: &CommandResponse) {
    let payload = match agvs_msg::encode(response) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(command = %response.command_id, error = %err, "response encode failed");
            return;
        }
    };
    if let Err(err) = broker.publish(channel, payload).await {
        warn!(command = %response.command_id, error = %err, "response publish failed");
    }
}
