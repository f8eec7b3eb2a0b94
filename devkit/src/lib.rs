/*!
# PrintHub DevKit - test tooling

Helpers for exercising the telemetry pipeline without a printer:
- Status payload builders for the firmware layouts seen in the field
- A mock MQTT client recording publishes and simulating reports
- A recording sink with async wait helpers
- JSON-lines capture files for replaying real sessions
*/

pub mod mqtt_stub;
pub mod payloads;
pub mod recorder;
pub mod replay;

pub use mqtt_stub::{MockMessage, MockMqttClient};
pub use payloads::{Firmware, ReportBuilder};
pub use recorder::EventRecorder;
pub use replay::{load_capture, write_capture, CapturedMessage};

/// Installs a test-friendly tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("printhub=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
