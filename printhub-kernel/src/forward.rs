//! Status event forwarding: every event is logged, and published as JSON on
//! `printhub/printers/{id}/events@v1` when a forward broker is configured.

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::mqtt::connect_forward;
use printhub_telemetry::StatusEvent;
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

pub fn events_topic(printer_id: &str) -> String {
    format!("printhub/printers/{printer_id}/events@v1")
}

pub trait EventPublisher {
    async fn publish_json(&self, topic: String, payload: Vec<u8>) -> anyhow::Result<()>;
}

impl EventPublisher for AsyncClient {
    async fn publish_json(&self, topic: String, payload: Vec<u8>) -> anyhow::Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

pub fn log_event(event: &StatusEvent) {
    let snapshot = event.snapshot();
    info!(
        printer_id = event.printer_id(),
        kind = event.kind(),
        state = ?snapshot.map(|s| s.status.state),
        progress = ?snapshot.and_then(|s| s.progress.percentage),
        "status event"
    );
}

pub async fn forward_event<P: EventPublisher>(publisher: &P, event: &StatusEvent) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(event)?;
    publisher
        .publish_json(events_topic(event.printer_id()), payload)
        .await
}

pub fn spawn_event_forwarder(
    mut events: UnboundedReceiver<StatusEvent>,
    forward: Option<MqttConf>,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        let Some(conf) = forward else {
            while let Some(event) = events.recv().await {
                health.record_event();
                log_event(&event);
            }
            return;
        };

        let (client, mut eventloop) = connect_forward(&conf, "events");
        loop {
            tokio::select! {
                received = events.recv() => {
                    let Some(event) = received else {
                        info!("event stream closed, forwarder stopping");
                        return;
                    };
                    health.record_event();
                    log_event(&event);
                    if let Err(e) = forward_event(&client, &event).await {
                        warn!(printer_id = event.printer_id(), "failed to forward event: {e:#}");
                    }
                },
                polled = eventloop.poll() => {
                    if let Err(e) = polled {
                        warn!("forward MQTT error: {e:?}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use printhub_devkit::{Firmware, MockMqttClient, ReportBuilder};
    use printhub_telemetry::{NormalizerConfig, TelemetryNormalizer};
    use serde_json::Value;
    use time::macros::datetime;

    impl EventPublisher for MockMqttClient {
        async fn publish_json(&self, topic: String, payload: Vec<u8>) -> anyhow::Result<()> {
            self.publish(topic, QoS::AtLeastOnce, false, payload).await
        }
    }

    #[tokio::test]
    async fn test_events_are_published_per_printer() {
        let normalizer = TelemetryNormalizer::new(NormalizerConfig::default()).unwrap();
        let (_id, mut rx) = normalizer.events().channel();
        let report = ReportBuilder::new(Firmware::Legacy)
            .state("RUNNING")
            .progress(12)
            .job("benchy", "benchy.gcode")
            .build();
        normalizer.ingest("X1C-01", "device/X1C-01/report", &report, datetime!(2026-10-19 10:00 UTC));

        let client = MockMqttClient::new();
        while let Ok(event) = rx.try_recv() {
            forward_event(&client, &event).await.unwrap();
        }

        let topic = events_topic("X1C-01");
        assert_eq!(topic, "printhub/printers/X1C-01/events@v1");
        let kinds: Vec<String> = client
            .messages_on(&topic)
            .iter()
            .map(|m| {
                let v: Value = serde_json::from_slice(&m.payload).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["connected", "progress_update"]);

        let last: Value = client.last_json(&topic).unwrap().unwrap();
        assert_eq!(last["snapshot"]["progress"]["percentage"], 12.0);
        assert_eq!(last["snapshot"]["status"]["state"], "printing");
    }

    #[tokio::test]
    async fn test_forwarder_without_broker_counts_events() {
        let normalizer = TelemetryNormalizer::new(NormalizerConfig::default()).unwrap();
        let (id, rx) = normalizer.events().channel();
        let health = HealthTracker::new(["X1C-01"]);
        let handle = spawn_event_forwarder(rx, None, health.clone());

        normalizer.on_connect("X1C-01", datetime!(2026-10-19 10:00 UTC));
        normalizer.on_disconnect("X1C-01", datetime!(2026-10-19 10:01 UTC));
        normalizer.events().unsubscribe(id);
        drop(normalizer);

        handle.await.unwrap();
        assert_eq!(health.get_health().events_emitted, 2);
    }
}
