//! ---
//! agvs_section: "06-coordinator"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Alert ingest and alarm materialization."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use agvs_common::time::from_epoch_seconds;
use agvs_metrics::CoordinatorMetrics;
use agvs_msg::FleetAlert;
use agvs_store::{Alarm, EventJournal, FleetEvent, FleetStore};
use agvs_transport::{ChannelHandler, InboundMessage};

use crate::record_event;

/// Channel handler for the shared alert channel.
///
/// Every decodable alert becomes an alarm row. The severity and origin are
/// resolved against the store taxonomies on a best-effort basis; an
/// unresolved reference stays `None` on the row and never blocks creation.
pub struct AlertChannelHandler {
    store: Arc<dyn FleetStore>,
    metrics: CoordinatorMetrics,
    journal: Option<Arc<EventJournal>>,
}

impl AlertChannelHandler {
    /// Build the handler over the given store.
    pub fn new(
        store: Arc<dyn FleetStore>,
        metrics: CoordinatorMetrics,
        journal: Option<Arc<EventJournal>>,
    ) -> Self {
        Self {
            store,
            metrics,
            journal,
        }
    }
}

#[async_trait]
impl ChannelHandler for AlertChannelHandler {
    async fn handle(&self, message: InboundMessage) {
        let alert: FleetAlert = match agvs_msg::decode(&message.payload) {
            Ok(alert) => alert,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "undecodable alert payload");
                return;
            }
        };
        // Taxonomy lookups and the insert run off the dispatch loop.
        tokio::spawn(materialize_alarm(
            alert,
            self.store.clone(),
            self.metrics.clone(),
            self.journal.clone(),
        ));
    }
}

async fn materialize_alarm(
    alert: FleetAlert,
    store: Arc<dyn FleetStore>,
    metrics: CoordinatorMetrics,
    journal: Option<Arc<EventJournal>>,
) {
    info!(
        origin = %alert.origin,
        level = %alert.level,
        message = %alert.message,
        "fleet alert received"
    );

    let alarm_type = match store.find_alarm_type(&alert.level).await {
        Ok(Some(alarm_type)) => Some(alarm_type),
        Ok(None) => {
            debug!(level = %alert.level, "alert level matched no alarm type");
            metrics.record_unresolved_reference("level");
            None
        }
        Err(err) => {
            warn!(level = %alert.level, error = %err, "alarm type lookup failed");
            None
        }
    };
    let origin = match store.find_origin(&alert.origin).await {
        Ok(Some(origin)) => Some(origin),
        Ok(None) => {
            debug!(origin = %alert.origin, "alert origin matched no origin record");
            metrics.record_unresolved_reference("origin");
            None
        }
        Err(err) => {
            warn!(origin = %alert.origin, error = %err, "origin lookup failed");
            None
        }
    };

    let alarm = Alarm {
        id: None,
        alarm_type_id: alarm_type.as_ref().map(|t| t.id),
        origin_id: origin.as_ref().map(|o| o.id),
        description: alert.message.clone(),
        raised_at: from_epoch_seconds(alert.timestamp),
    };
    match store.save_alarm(alarm).await {
        Ok(_) => {
            metrics.record_alert(&alert.level);
            record_event(
                &journal,
                FleetEvent::AlarmRaised {
                    origin: alert.origin,
                    level: alert.level,
                    resolved_type: alarm_type.is_some(),
                    resolved_origin: origin.is_some(),
                },
            );
        }
        Err(err) => warn!(error = %err, "alarm persist failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use agvs_metrics::new_registry;
    use agvs_msg::topics;
    use agvs_store::{AlarmType, MemoryStore, Origin};

    fn test_metrics() -> CoordinatorMetrics {
        CoordinatorMetrics::new(new_registry()).expect("metrics build")
    }

    async fn deliver(handler: &AlertChannelHandler, alert: &FleetAlert) {
        let payload = agvs_msg::encode(alert).expect("encode alert");
        handler
            .handle(InboundMessage::new(topics::ALERTS, payload))
            .await;
    }

    /// The insert runs on a spawned task; poll until it lands.
    async fn wait_for_alarms(store: &MemoryStore, count: usize) -> Vec<Alarm> {
        for _ in 0..100 {
            let alarms = store.alarms();
            if alarms.len() >= count {
                return alarms;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("alarm rows never materialized");
    }

    #[tokio::test]
    async fn alert_materializes_alarm_with_resolved_references() {
        let store = Arc::new(MemoryStore::new());
        store.seed_alarm_type(AlarmType {
            id: 3,
            label: "High severity".to_owned(),
            criticity: "ERROR".to_owned(),
        });
        store.seed_origin(Origin {
            id: 8,
            label: "lidar".to_owned(),
        });
        let handler = AlertChannelHandler::new(store.clone(), test_metrics(), None);

        deliver(
            &handler,
            &FleetAlert {
                origin: "lidar".to_owned(),
                timestamp: 1_700_000_000.5,
                level: "ERROR".to_owned(),
                message: "obstacle persisted for 30s".to_owned(),
            },
        )
        .await;

        let alarms = wait_for_alarms(&store, 1).await;
        assert_eq!(alarms[0].alarm_type_id, Some(3));
        assert_eq!(alarms[0].origin_id, Some(8));
        assert_eq!(alarms[0].description, "obstacle persisted for 30s");
        assert_eq!(alarms[0].raised_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn unresolved_references_still_create_the_alarm() {
        let store = Arc::new(MemoryStore::new());
        let handler = AlertChannelHandler::new(store.clone(), test_metrics(), None);

        deliver(
            &handler,
            &FleetAlert {
                origin: "mystery-box".to_owned(),
                timestamp: 1_700_000_000.0,
                level: "SHOUTING".to_owned(),
                message: "who am I".to_owned(),
            },
        )
        .await;

        let alarms = wait_for_alarms(&store, 1).await;
        assert_eq!(alarms[0].alarm_type_id, None);
        assert_eq!(alarms[0].origin_id, None);
        assert_eq!(alarms[0].description, "who am I");
    }
}
