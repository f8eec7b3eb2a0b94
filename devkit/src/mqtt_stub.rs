/*!
Mock MQTT client for development without a broker

Records every publish and subscription, and lets tests inject printer
reports as if they came from the broker.
*/

use anyhow::Result;
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mirrors the `rumqttc::AsyncClient` calls the kernel makes.
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    incoming: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel receiving simulated inbound messages.
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.incoming.lock() = Some(tx);
        rx
    }

    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        debug!(topic = %message.topic, bytes = message.payload.len(), "[mock] published");
        self.published.lock().push(message);
        Ok(())
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        info!(%topic, "[mock] subscribed");
        self.subscriptions.lock().push(topic);
        Ok(())
    }

    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        };
        debug!(topic = %message.topic, "[mock] simulated incoming");
        if let Some(tx) = self.incoming.lock().as_ref() {
            tx.send(message)
                .map_err(|e| anyhow::anyhow!("incoming channel closed: {e}"))?;
        }
        Ok(())
    }

    /// Injects a status report on `device/{serial}/report`.
    pub async fn simulate_report(&self, serial: &str, report: &Value) -> Result<()> {
        let payload = serde_json::to_vec(report)?;
        self.simulate_incoming(crate::payloads::report_topic(serial), payload)
            .await
    }

    pub fn published_messages(&self) -> Vec<MockMessage> {
        self.published.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn messages_on(&self, topic: &str) -> Vec<MockMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Last message on a topic, decoded as JSON.
    pub fn last_json<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.messages_on(topic).last() {
            Some(message) => Ok(Some(serde_json::from_slice(&message.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published.lock().clear();
        self.subscriptions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{Firmware, ReportBuilder};

    #[tokio::test]
    async fn test_publish_and_subscribe_are_recorded() {
        let client = MockMqttClient::new();
        client.subscribe("device/X1C-01/report", QoS::AtMostOnce).await.unwrap();
        client
            .publish("device/X1C-01/request", QoS::AtMostOnce, false, br#"{"pushing":{}}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(client.subscriptions(), vec!["device/X1C-01/report"]);
        let sent = client.messages_on("device/X1C-01/request");
        assert_eq!(sent.len(), 1);
        let json: Option<Value> = client.last_json("device/X1C-01/request").unwrap();
        assert!(json.unwrap()["pushing"].is_object());

        client.clear();
        assert!(client.published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_simulated_report_reaches_receiver() {
        let client = MockMqttClient::new();
        let mut rx = client.setup_receiver();
        let report = ReportBuilder::new(Firmware::Legacy).bed(60.0).build();

        client.simulate_report("P1S-02", &report).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "device/P1S-02/report");
        let decoded: Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(decoded, report);
    }
}
