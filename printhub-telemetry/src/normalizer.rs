//! Telemetry normalizer: inbound messages, snapshot publishing and queries.
//!
//! Each printer owns a slot. Its tracker mutex serializes that printer's
//! updates (and event dispatch, which keeps per-printer order); snapshots are
//! published as whole `Arc`s so a reader sees either the previous or the new
//! snapshot, never a mix. Printers never share a lock on the ingestion path,
//! except the map lookup and the global raw-message debug slot.

use crate::ams::{AmsMapper, AmsReading};
use crate::classifier::{Classifier, Emit, JobPhase, PhaseInputs, PrinterState};
use crate::config::{NormalizerConfig, RawCapture, Retention};
use crate::error::{NormalizeError, Result};
use crate::events::{EventBus, StatusEvent, UsageReport};
use crate::metrics::{Metric, MetricTable, MetricValues};
use crate::path::kind_of;
use crate::snapshot::{NormalizedSnapshot, VendorError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// The last message received, kept for field debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawMessage {
    pub printer_id: String,
    pub topic: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    pub payload: Value,
}

/// Result of one inbound message.
#[derive(Debug)]
pub enum Ingest {
    Applied { events: usize },
    /// The message was logged and discarded; the previous snapshot is untouched.
    Dropped(NormalizeError),
}

impl Ingest {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

struct RawSlot {
    mode: RawCapture,
    latest: Mutex<Option<RawMessage>>,
    per_printer: Mutex<HashMap<String, RawMessage>>,
}

impl RawSlot {
    fn new(mode: RawCapture) -> Self {
        Self {
            mode,
            latest: Mutex::new(None),
            per_printer: Mutex::new(HashMap::new()),
        }
    }

    fn capture(&self, printer_id: &str, topic: &str, payload: &Value, received_at: OffsetDateTime) {
        if self.mode == RawCapture::Disabled {
            return;
        }
        let message = RawMessage {
            printer_id: printer_id.to_string(),
            topic: topic.to_string(),
            received_at,
            payload: payload.clone(),
        };
        if self.mode == RawCapture::PerPrinter {
            self.per_printer
                .lock()
                .insert(printer_id.to_string(), message.clone());
        }
        *self.latest.lock() = Some(message);
    }
}

#[derive(Default)]
struct Tracker {
    classifier: Classifier,
    values: MetricValues,
    ams: Option<AmsReading>,
}

#[derive(Default)]
struct PrinterSlot {
    tracker: Mutex<Tracker>,
    published: RwLock<Option<Arc<NormalizedSnapshot>>>,
}

impl PrinterSlot {
    fn current(&self) -> Option<Arc<NormalizedSnapshot>> {
        self.published.read().clone()
    }

    fn publish(&self, snapshot: Arc<NormalizedSnapshot>) {
        *self.published.write() = Some(snapshot);
    }
}

pub struct TelemetryNormalizer {
    config: NormalizerConfig,
    table: MetricTable,
    ams: AmsMapper,
    printers: RwLock<HashMap<String, Arc<PrinterSlot>>>,
    raw: RawSlot,
    bus: EventBus,
}

impl TelemetryNormalizer {
    pub fn new(config: NormalizerConfig) -> Result<Self> {
        if config.events.min_progress_delta < 0.0 || config.events.min_temperature_delta < 0.0 {
            return Err(NormalizeError::Config(
                "event thresholds must not be negative".to_string(),
            ));
        }
        let table = MetricTable::from_config(&config)?;
        let ams = AmsMapper::new(config.spread_unit_humidity)?;
        Ok(Self {
            raw: RawSlot::new(config.raw_capture),
            config,
            table,
            ams,
            printers: RwLock::new(HashMap::new()),
            bus: EventBus::new(),
        })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    fn slot(&self, printer_id: &str) -> Arc<PrinterSlot> {
        if let Some(slot) = self.printers.read().get(printer_id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.printers.write().entry(printer_id.to_string()).or_default())
    }

    /// Decodes a JSON body, then ingests it.
    pub fn ingest_bytes(
        &self,
        printer_id: &str,
        topic: &str,
        body: &[u8],
        received_at: OffsetDateTime,
    ) -> Ingest {
        match serde_json::from_slice::<Value>(body) {
            Ok(payload) => self.ingest(printer_id, topic, &payload, received_at),
            Err(source) => {
                let lossy = Value::String(String::from_utf8_lossy(body).into_owned());
                self.raw.capture(printer_id, topic, &lossy, received_at);
                let err = NormalizeError::Undecodable {
                    printer_id: printer_id.to_string(),
                    source,
                };
                warn!(printer_id, topic, "{err}, message dropped");
                Ingest::Dropped(err)
            }
        }
    }

    /// Normalizes one status payload and dispatches the resulting events.
    pub fn ingest(
        &self,
        printer_id: &str,
        topic: &str,
        payload: &Value,
        received_at: OffsetDateTime,
    ) -> Ingest {
        self.raw.capture(printer_id, topic, payload, received_at);

        if !payload.is_object() {
            let err = NormalizeError::MalformedPayload {
                printer_id: printer_id.to_string(),
                found: kind_of(payload),
            };
            warn!(printer_id, topic, "{err}, message dropped");
            return Ingest::Dropped(err);
        }

        let slot = self.slot(printer_id);
        let mut tracker = slot.tracker.lock();
        let previous = slot.current();
        let mut events = Vec::new();

        if tracker.classifier.connect() {
            info!(printer_id, "printer connected (first message)");
            events.push(StatusEvent::Connected {
                printer_id: printer_id.to_string(),
                at: received_at,
                snapshot: previous.clone(),
            });
        }

        let fresh = self.table.resolve_all(payload);
        let vendor_state_fresh = fresh.contains_key(&Metric::VendorState);
        let progress_fresh = fresh.contains_key(&Metric::Progress);
        tracker.values.apply(fresh, &self.table);
        let ams = match self.ams.map(payload) {
            AmsReading::Absent if self.config.ams_retention == Retention::Sticky => {
                tracker.ams.clone().unwrap_or(AmsReading::Absent)
            }
            reading => reading,
        };
        tracker.ams = Some(ams.clone());

        let values = &tracker.values;
        let phase = JobPhase::derive(&PhaseInputs {
            vendor_state: values.text(Metric::VendorState),
            vendor_state_fresh,
            job_name: values.text(Metric::JobName),
            filename: values.text(Metric::Filename),
            progress: values.number(Metric::Progress),
            progress_fresh,
        });
        let error = VendorError::from_values(values);

        let prev_state = tracker.classifier.state();
        let emits = tracker.classifier.observe(phase, error.as_ref());
        let state = tracker.classifier.state();
        if state != prev_state {
            info!(printer_id, from = ?prev_state, to = ?state, "printer state changed");
        }

        let snapshot = Arc::new(NormalizedSnapshot::build(
            printer_id,
            received_at,
            state,
            &tracker.values,
            ams,
        ));
        slot.publish(Arc::clone(&snapshot));

        let mut progress_reported = false;
        for emit in emits {
            let event = match emit {
                Emit::ProgressUpdate => {
                    progress_reported = true;
                    StatusEvent::ProgressUpdate {
                        snapshot: Arc::clone(&snapshot),
                    }
                }
                Emit::PrintCompleted => StatusEvent::PrintCompleted {
                    usage: UsageReport::from_usage(snapshot.filament_usage.as_ref()),
                    snapshot: Arc::clone(&snapshot),
                },
                Emit::PrintFailed => StatusEvent::PrintFailed {
                    error: error.clone(),
                    snapshot: Arc::clone(&snapshot),
                },
                Emit::Error => {
                    let Some(err) = error.clone() else {
                        continue;
                    };
                    warn!(printer_id, code = ?err.code, message = ?err.message, "vendor error reported");
                    StatusEvent::Error {
                        error: err,
                        snapshot: Arc::clone(&snapshot),
                    }
                }
            };
            events.push(event);
        }

        if state == PrinterState::Printing
            && !progress_reported
            && tracker
                .classifier
                .progress_due(previous.as_deref(), &snapshot, &self.config.events)
        {
            progress_reported = true;
            events.push(StatusEvent::ProgressUpdate {
                snapshot: Arc::clone(&snapshot),
            });
        }
        if progress_reported {
            tracker.classifier.record_progress(&snapshot);
        }

        for event in &events {
            debug!(printer_id, kind = event.kind(), "dispatching status event");
            self.bus.publish(event);
        }
        Ingest::Applied {
            events: events.len(),
        }
    }

    /// Transport-level connect notification.
    pub fn on_connect(&self, printer_id: &str, at: OffsetDateTime) {
        let slot = self.slot(printer_id);
        let mut tracker = slot.tracker.lock();
        if !tracker.classifier.connect() {
            return;
        }
        let snapshot = slot.current().map(|s| {
            let updated = Arc::new(s.with_state(PrinterState::Connected));
            slot.publish(Arc::clone(&updated));
            updated
        });
        info!(printer_id, "printer connected");
        self.bus.publish(&StatusEvent::Connected {
            printer_id: printer_id.to_string(),
            at,
            snapshot,
        });
        drop(tracker);
    }

    /// Transport-level disconnect notification. The last snapshot is kept.
    pub fn on_disconnect(&self, printer_id: &str, at: OffsetDateTime) {
        let Some(slot) = self.printers.read().get(printer_id).cloned() else {
            return;
        };
        let mut tracker = slot.tracker.lock();
        if !tracker.classifier.disconnect() {
            return;
        }
        let snapshot = slot.current().map(|s| {
            let updated = Arc::new(s.with_state(PrinterState::Disconnected));
            slot.publish(Arc::clone(&updated));
            updated
        });
        info!(printer_id, "printer disconnected");
        self.bus.publish(&StatusEvent::Disconnected {
            printer_id: printer_id.to_string(),
            at,
            snapshot,
        });
        drop(tracker);
    }

    pub fn current_snapshot(&self, printer_id: &str) -> Option<Arc<NormalizedSnapshot>> {
        self.printers.read().get(printer_id)?.current()
    }

    pub fn printer_state(&self, printer_id: &str) -> Option<PrinterState> {
        let slot = self.printers.read().get(printer_id).cloned()?;
        let state = slot.tracker.lock().classifier.state();
        Some(state)
    }

    pub fn printers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.printers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Operator-side removal: forgets the snapshot and the state machine.
    pub fn remove_printer(&self, printer_id: &str) -> bool {
        let removed = self.printers.write().remove(printer_id).is_some();
        if removed {
            self.raw.per_printer.lock().remove(printer_id);
            info!(printer_id, "printer removed from live set");
        }
        removed
    }

    /// Most recent raw message across all printers.
    pub fn last_raw_message(&self) -> Option<RawMessage> {
        self.raw.latest.lock().clone()
    }

    /// Most recent raw message of one printer (`raw_capture: per_printer` only).
    pub fn last_raw_message_for(&self, printer_id: &str) -> Option<RawMessage> {
        self.raw.per_printer.lock().get(printer_id).cloned()
    }
}
