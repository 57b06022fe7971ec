//! ---
//! agvs_section: "03-transport"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "MQTT-backed broker session with reconnect handling."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agvs_common::config::BrokerConfig;

use crate::broker::{Broker, InboundMessage, ReconnectPolicy};
use crate::Result;

/// Retained availability payload published after every (re)connect.
pub const AVAILABILITY_ONLINE: &[u8] = b"online";
/// Retained availability payload for the last will and graceful shutdown.
pub const AVAILABILITY_OFFLINE: &[u8] = b"offline";

/// A live MQTT session: the broker handle, the inbound stream and the
/// connection supervisor task.
pub struct MqttConnection {
    /// Publish/subscribe handle.
    pub broker: MqttBroker,
    /// Inbound messages in arrival order; feed this to the dispatch loop.
    pub inbound: mpsc::Receiver<InboundMessage>,
    /// Join handle of the connection supervisor; resolves after shutdown.
    pub supervisor: JoinHandle<()>,
}

/// MQTT-backed [`Broker`].
///
/// The session is established lazily by the supervisor task; publishes and
/// subscribes issued while disconnected are queued by the client and flushed
/// on (re)connect. The subscription set is tracked so a reconnect replays
/// every subscription before traffic resumes.
#[derive(Clone)]
pub struct MqttBroker {
    client: AsyncClient,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
}

impl MqttBroker {
    /// Open a session against the configured broker.
    ///
    /// `availability_channel` carries the retained `online`/`offline`
    /// payloads; the broker's last will flips it to `offline` if the process
    /// dies without a graceful shutdown.
    pub fn connect(
        config: &BrokerConfig,
        availability_channel: &str,
        shutdown: broadcast::Receiver<()>,
    ) -> MqttConnection {
        let client_id = format!("{}-{}", config.client_id_prefix, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(config.clean_session);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        options.set_last_will(LastWill::new(
            availability_channel,
            AVAILABILITY_OFFLINE.to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, event_loop) = AsyncClient::new(options, config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let subscriptions = Arc::new(Mutex::new(BTreeSet::new()));

        let supervisor = tokio::spawn(run_session(
            event_loop,
            client.clone(),
            inbound_tx,
            subscriptions.clone(),
            availability_channel.to_owned(),
            ReconnectPolicy::new(config.reconnect_min_delay, config.reconnect_max_delay),
            shutdown,
        ));

        MqttConnection {
            broker: MqttBroker {
                client,
                subscriptions,
            },
            inbound: inbound_rx,
            supervisor,
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(channel, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        // Track first so a racing reconnect replays this channel too.
        self.subscriptions.lock().insert(channel.to_owned());
        self.client.subscribe(channel, QoS::AtMostOnce).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    mut event_loop: EventLoop,
    client: AsyncClient,
    inbound: mpsc::Sender<InboundMessage>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    availability_channel: String,
    policy: ReconnectPolicy,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut rng = StdRng::from_entropy();
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("shutdown signalled; closing broker session");
                let _ = client
                    .publish(
                        availability_channel.as_str(),
                        QoS::AtLeastOnce,
                        true,
                        AVAILABILITY_OFFLINE.to_vec(),
                    )
                    .await;
                let _ = client.disconnect().await;
                flush_until_disconnect(&mut event_loop).await;
                break;
            }
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    attempt = 0;
                    info!("broker session established");
                    replay_subscriptions(&client, &subscriptions).await;
                    if let Err(err) = client
                        .publish(
                            availability_channel.as_str(),
                            QoS::AtLeastOnce,
                            true,
                            AVAILABILITY_ONLINE.to_vec(),
                        )
                        .await
                    {
                        warn!(error = %err, "failed to publish availability");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let message = InboundMessage {
                        channel: publish.topic.clone(),
                        payload: publish.payload,
                    };
                    if inbound.send(message).await.is_err() {
                        debug!("inbound consumer dropped; broker session exiting");
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let delay = policy.delay_for(attempt, &mut rng);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "broker connection error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn replay_subscriptions(client: &AsyncClient, subscriptions: &Arc<Mutex<BTreeSet<String>>>) {
    let channels: Vec<String> = subscriptions.lock().iter().cloned().collect();
    for channel in channels {
        if let Err(err) = client.subscribe(channel.clone(), QoS::AtMostOnce).await {
            warn!(channel = %channel, error = %err, "re-subscription failed");
        }
    }
}

/// Keep polling briefly so the queued offline publish and disconnect reach
/// the wire before the task exits.
async fn flush_until_disconnect(event_loop: &mut EventLoop) {
    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = event_loop.poll() => match event {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_owned(),
            port: 1,
            client_id_prefix: "agvs-test".to_owned(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(5),
            clean_session: true,
            channel_capacity: 8,
            reconnect_min_delay: Duration::from_millis(20),
            reconnect_max_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn supervisor_exits_on_shutdown_without_a_broker() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let connection = MqttBroker::connect(
            &offline_config(),
            "services/api/status",
            shutdown_tx.subscribe(),
        );

        // Session never establishes (nothing listens on port 1); the
        // supervisor must still obey shutdown promptly.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).expect("signal shutdown");
        tokio::time::timeout(Duration::from_secs(5), connection.supervisor)
            .await
            .expect("supervisor exits in time")
            .expect("supervisor join");
    }

    #[tokio::test]
    async fn tracked_subscriptions_survive_for_replay() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let connection =
            MqttBroker::connect(&offline_config(), "services/api/status", shutdown_tx.subscribe());

        connection
            .broker
            .subscribe("vehicles/1/state")
            .await
            .expect("subscribe queued");
        assert!(connection
            .broker
            .subscriptions
            .lock()
            .contains("vehicles/1/state"));

        shutdown_tx.send(()).expect("signal shutdown");
        let _ = connection.supervisor.await;
    }
}
