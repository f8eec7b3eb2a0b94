//! Status events and their subscribers.

use crate::snapshot::{FilamentUsage, NormalizedSnapshot, VendorError};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::trace;

/// Filament figures attached to a completed print.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UsageReport {
    Reported {
        grams: Option<f64>,
        millimeters: Option<f64>,
    },
    Unknown {
        reason: String,
    },
}

impl UsageReport {
    pub const NOT_REPORTED: &'static str = "usage not reported by firmware";

    pub fn from_usage(usage: Option<&FilamentUsage>) -> Self {
        match usage {
            Some(u) => Self::Reported {
                grams: u.grams,
                millimeters: u.millimeters,
            },
            None => Self::Unknown {
                reason: Self::NOT_REPORTED.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Connected {
        printer_id: String,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        /// Last known snapshot, retained across disconnects.
        snapshot: Option<Arc<NormalizedSnapshot>>,
    },
    Disconnected {
        printer_id: String,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        snapshot: Option<Arc<NormalizedSnapshot>>,
    },
    ProgressUpdate {
        snapshot: Arc<NormalizedSnapshot>,
    },
    PrintCompleted {
        snapshot: Arc<NormalizedSnapshot>,
        usage: UsageReport,
    },
    PrintFailed {
        snapshot: Arc<NormalizedSnapshot>,
        error: Option<VendorError>,
    },
    Error {
        snapshot: Arc<NormalizedSnapshot>,
        error: VendorError,
    },
}

impl StatusEvent {
    pub fn printer_id(&self) -> &str {
        match self {
            Self::Connected { printer_id, .. } | Self::Disconnected { printer_id, .. } => printer_id,
            Self::ProgressUpdate { snapshot }
            | Self::PrintCompleted { snapshot, .. }
            | Self::PrintFailed { snapshot, .. }
            | Self::Error { snapshot, .. } => &snapshot.printer_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::PrintCompleted { .. } => "print_completed",
            Self::PrintFailed { .. } => "print_failed",
            Self::Error { .. } => "error",
        }
    }

    pub fn snapshot(&self) -> Option<&NormalizedSnapshot> {
        match self {
            Self::Connected { snapshot, .. } | Self::Disconnected { snapshot, .. } => snapshot.as_deref(),
            Self::ProgressUpdate { snapshot }
            | Self::PrintCompleted { snapshot, .. }
            | Self::PrintFailed { snapshot, .. }
            | Self::Error { snapshot, .. } => Some(snapshot.as_ref()),
        }
    }
}

/// Receives events in per-printer emission order.
///
/// Handlers run on the ingesting thread while that printer's slot is held:
/// they must not ingest for the same printer.
pub trait StatusListener: Send + Sync {
    fn on_event(&self, event: &StatusEvent);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_event(&self, event: &StatusEvent) {
        self(event)
    }
}

struct ChannelListener {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusListener for ChannelListener {
    fn on_event(&self, event: &StatusEvent) {
        if self.tx.send(event.clone()).is_err() {
            trace!(kind = event.kind(), "event channel closed, dropping event");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn StatusListener>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<L>(&self, listener: L) -> SubscriptionId
    where
        L: StatusListener + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Async consumers: every event is cloned into an unbounded channel.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(ChannelListener { tx }), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn publish(&self, event: &StatusEvent) {
        // Listeners may subscribe from inside a handler; call them outside the lock.
        let listeners: Vec<Arc<dyn StatusListener>> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}
