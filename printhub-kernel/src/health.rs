use crate::config::MqttConf;
use crate::mqtt::connect_forward;
use parking_lot::Mutex;
use printhub_telemetry::Ingest;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tracing::{debug, info, warn};

pub const HEALTH_TOPIC: &str = "printhub/kernel/health@v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub printers_configured: u32,
    pub printers_connected: u32,
    pub sessions: BTreeMap<String, SessionStatus>,
    pub messages_ingested: u64,
    pub messages_dropped: u64,
    pub events_emitted: u64,
    pub mqtt_reconnects: u64,
    pub memory_usage_mb: Option<f32>,
}

#[derive(Default)]
struct Counters {
    ingested: AtomicU64,
    dropped: AtomicU64,
    events: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
    sessions: Arc<Mutex<BTreeMap<String, SessionStatus>>>,
}

impl HealthTracker {
    pub fn new<'a>(printer_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let sessions = printer_ids
            .into_iter()
            .map(|id| (id.to_string(), SessionStatus::Connecting))
            .collect();
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
            sessions: Arc::new(Mutex::new(sessions)),
        }
    }

    pub fn mark_connected(&self, printer_id: &str) {
        self.sessions
            .lock()
            .insert(printer_id.to_string(), SessionStatus::Connected);
    }

    pub fn mark_reconnecting(&self, printer_id: &str) {
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .insert(printer_id.to_string(), SessionStatus::Reconnecting);
    }

    pub fn record_ingest(&self, outcome: &Ingest) {
        let counter = if outcome.is_applied() {
            &self.counters.ingested
        } else {
            &self.counters.dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> KernelHealth {
        let sessions = self.sessions.lock().clone();
        let connected = sessions
            .values()
            .filter(|s| **s == SessionStatus::Connected)
            .count();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            printers_configured: sessions.len() as u32,
            printers_connected: connected as u32,
            sessions,
            messages_ingested: self.counters.ingested.load(Ordering::Relaxed),
            messages_dropped: self.counters.dropped.load(Ordering::Relaxed),
            events_emitted: self.counters.events.load(Ordering::Relaxed),
            mqtt_reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }

    /// Publishes (or logs, without a forward broker) the kernel health periodically.
    pub fn spawn_health_publisher(&self, forward: Option<MqttConf>, every: Duration) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            let Some(conf) = forward else {
                loop {
                    interval.tick().await;
                    let health = tracker.get_health();
                    info!(
                        uptime = health.uptime_seconds,
                        connected = health.printers_connected,
                        ingested = health.messages_ingested,
                        dropped = health.messages_dropped,
                        "kernel health"
                    );
                }
            };

            let (client, mut eventloop) = connect_forward(&conf, "health");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let health = tracker.get_health();
                        match serde_json::to_vec(&health) {
                            Ok(payload) => {
                                if let Err(e) = client.publish(HEALTH_TOPIC, QoS::AtLeastOnce, false, payload).await {
                                    warn!("failed to publish health: {e:?}");
                                } else {
                                    debug!(uptime = health.uptime_seconds, "published kernel health");
                                }
                            }
                            Err(e) => warn!("failed to encode health: {e}"),
                        }
                    },
                    event = eventloop.poll() => {
                        if let Err(e) = event {
                            warn!("health MQTT error: {e:?}");
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            }
        });
    }
}

fn get_memory_usage_mb() -> Option<f32> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let kb = status
            .lines()
            .find(|l| l.starts_with("VmRSS:"))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()?;
        Some(kb as f32 / 1024.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
