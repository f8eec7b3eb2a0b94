use crate::config::{MqttConf, PrinterConf};
use crate::health::HealthTracker;
use anyhow::Context;
use printhub_telemetry::{Ingest, TelemetryNormalizer};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Status reports can exceed the rumqttc default packet limit.
const MAX_PACKET_BYTES: usize = 512 * 1024;

pub fn report_topic(serial: &str) -> String {
    format!("device/{serial}/report")
}

pub fn request_topic(serial: &str) -> String {
    format!("device/{serial}/request")
}

/// Serial from `device/{serial}/report`.
pub fn parse_report_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("device"), Some(serial), Some("report"), None) if !serial.is_empty() => Some(serial),
        _ => None,
    }
}

/// Asks the printer for a full status instead of waiting for deltas.
pub fn pushall_request() -> serde_json::Value {
    serde_json::json!({"pushing": {"sequence_id": "0", "command": "pushall"}})
}

fn client_id(role: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("printhub-{role}-{}", &suffix[..8])
}

pub fn connect_forward(conf: &MqttConf, role: &str) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(client_id(role), &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

fn printer_options(printer: &PrinterConf) -> anyhow::Result<MqttOptions> {
    let mut opts = MqttOptions::new(client_id(printer.printer_id()), &printer.host, printer.port);
    opts.set_keep_alive(Duration::from_secs(15));
    opts.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
    match printer.access_code() {
        Some(code) => {
            opts.set_credentials(&printer.username, code);
        }
        None => warn!(printer_id = printer.printer_id(), "no access code configured"),
    }
    if let Some(ca_file) = &printer.ca_file {
        let ca = std::fs::read(ca_file)
            .with_context(|| format!("reading CA file {}", ca_file.display()))?;
        opts.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
    }
    Ok(opts)
}

/// Feeds one inbound publish to the normalizer if it is this printer's report.
pub fn handle_report(
    normalizer: &TelemetryNormalizer,
    health: &HealthTracker,
    printer_id: &str,
    serial: &str,
    topic: &str,
    payload: &[u8],
) -> Option<Ingest> {
    if parse_report_topic(topic) != Some(serial) {
        debug!(printer_id, %topic, "ignoring message on unexpected topic");
        return None;
    }
    let outcome = normalizer.ingest_bytes(printer_id, topic, payload, OffsetDateTime::now_utc());
    health.record_ingest(&outcome);
    Some(outcome)
}

/// One MQTT session per printer, feeding the normalizer until the process exits.
pub fn spawn_printer_session(
    printer: PrinterConf,
    normalizer: Arc<TelemetryNormalizer>,
    health: HealthTracker,
) -> anyhow::Result<JoinHandle<()>> {
    let opts = printer_options(&printer)?;
    let printer_id = printer.printer_id().to_string();
    let serial = printer.serial.clone();

    Ok(task::spawn(async move {
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        let report = report_topic(&serial);
        let request = request_topic(&serial);
        let mut connected = false;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    connected = true;
                    info!(%printer_id, host = %printer.host, "printer session established");
                    health.mark_connected(&printer_id);
                    normalizer.on_connect(&printer_id, OffsetDateTime::now_utc());
                    if let Err(e) = client.subscribe(report.as_str(), QoS::AtMostOnce).await {
                        warn!(%printer_id, "subscribe failed: {e:?}");
                    }
                    let pushall = pushall_request().to_string();
                    if let Err(e) = client.publish(request.as_str(), QoS::AtMostOnce, false, pushall).await {
                        warn!(%printer_id, "pushall request failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    handle_report(&normalizer, &health, &printer_id, &serial, &p.topic, &p.payload);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    if std::mem::take(&mut connected) {
                        normalizer.on_disconnect(&printer_id, OffsetDateTime::now_utc());
                        health.mark_reconnecting(&printer_id);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%printer_id, "MQTT error: {e:?}");
                    if std::mem::take(&mut connected) {
                        normalizer.on_disconnect(&printer_id, OffsetDateTime::now_utc());
                        health.mark_reconnecting(&printer_id);
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use printhub_devkit::{Firmware, MockMqttClient, ReportBuilder};
    use printhub_telemetry::{NormalizerConfig, PrinterState};

    #[test]
    fn test_report_topic_parsing() {
        assert_eq!(parse_report_topic("device/01S00A000000001/report"), Some("01S00A000000001"));
        assert_eq!(parse_report_topic(&report_topic("X1C-01")), Some("X1C-01"));
        assert_eq!(parse_report_topic("device//report"), None);
        assert_eq!(parse_report_topic("device/X1C-01/request"), None);
        assert_eq!(parse_report_topic("device/X1C-01/report/extra"), None);
        assert_eq!(parse_report_topic("printhub/X1C-01/report"), None);
    }

    #[test]
    fn test_pushall_shape() {
        let request = pushall_request();
        assert_eq!(request["pushing"]["command"], "pushall");
        assert_eq!(request_topic("X1C-01"), "device/X1C-01/request");
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = client_id("X1C-01");
        let b = client_id("X1C-01");
        assert!(a.starts_with("printhub-X1C-01-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_ca_file_is_reported() {
        let printer = PrinterConf {
            id: None,
            serial: "X1C-01".into(),
            host: "127.0.0.1".into(),
            port: 8883,
            username: "bblp".into(),
            access_code: Some("12345678".into()),
            ca_file: Some("/nonexistent/ca.pem".into()),
        };
        let err = printer_options(&printer).unwrap_err();
        assert!(format!("{err:#}").contains("reading CA file"));
    }

    #[tokio::test]
    async fn test_reports_from_the_broker_reach_the_normalizer() {
        let client = MockMqttClient::new();
        let mut inbound = client.setup_receiver();
        let normalizer = TelemetryNormalizer::new(NormalizerConfig::default()).unwrap();
        let health = HealthTracker::new(["workshop-x1c"]);

        let report = ReportBuilder::new(Firmware::Legacy)
            .state("RUNNING")
            .progress(25)
            .job("benchy", "benchy.gcode")
            .build();
        client.simulate_report("01S00A000000001", &report).await.unwrap();
        client.simulate_report("01S00A000000002", &report).await.unwrap();
        client
            .simulate_incoming(report_topic("01S00A000000001"), b"not json".to_vec())
            .await
            .unwrap();
        drop(client);

        let mut handled = Vec::new();
        while let Some(message) = inbound.recv().await {
            handled.push(handle_report(
                &normalizer,
                &health,
                "workshop-x1c",
                "01S00A000000001",
                &message.topic,
                &message.payload,
            ));
        }

        assert_eq!(handled.len(), 3);
        assert!(handled[0].as_ref().is_some_and(Ingest::is_applied));
        assert!(handled[1].is_none());
        assert!(handled[2].as_ref().is_some_and(|outcome| !outcome.is_applied()));

        assert_eq!(normalizer.printer_state("workshop-x1c"), Some(PrinterState::Printing));
        let snapshot = normalizer.current_snapshot("workshop-x1c").unwrap();
        assert_eq!(snapshot.progress.percentage, Some(25.0));
        let stats = health.get_health();
        assert_eq!(stats.messages_ingested, 1);
        assert_eq!(stats.messages_dropped, 1);
    }
}
