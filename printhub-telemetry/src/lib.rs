/*!
# PrintHub Telemetry

Normalizes the status stream of networked 3D printers into one canonical
snapshot per printer, plus a small set of status events.

- Field resolution over ordered candidate paths, so firmware layout changes
  stay a table edit (`metrics`, `path`, `resolver`)
- AMS tray mapping to user-facing slots 1-4 (`ams`)
- Connection and job state machine (`classifier`)
- Lock-per-printer ingestion with atomic snapshot swaps (`normalizer`)

The crate performs no I/O: transports feed payloads in, subscribers get
events out.
*/

pub mod ams;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod normalizer;
pub mod path;
pub mod resolver;
pub mod snapshot;

pub use ams::{AmsReading, Occupancy, SlotMapping, SlotRef, SlotStatus};
pub use classifier::PrinterState;
pub use config::{EventThresholds, NormalizerConfig, RawCapture, Retention};
pub use error::{NormalizeError, Result};
pub use events::{EventBus, StatusEvent, StatusListener, SubscriptionId, UsageReport};
pub use metrics::Metric;
pub use normalizer::{Ingest, RawMessage, TelemetryNormalizer};
pub use path::FieldPath;
pub use snapshot::{FilamentUsage, NormalizedSnapshot, VendorError};
