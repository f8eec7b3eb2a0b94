//! Canonical per-printer snapshot.
//!
//! Every metric is either a resolved value or `None`; there is no placeholder
//! reading.

use crate::ams::{AmsReading, SLOT_COUNT};
use crate::classifier::PrinterState;
use crate::metrics::{Metric, MetricValues};
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Temperatures {
    pub nozzle1: Option<f64>,
    pub nozzle2: Option<f64>,
    pub bed: Option<f64>,
    pub chamber: Option<f64>,
}

impl Temperatures {
    /// Largest change on any sensor reported by both sides.
    pub fn max_delta(&self, other: &Temperatures) -> f64 {
        [
            (self.nozzle1, other.nozzle1),
            (self.nozzle2, other.nozzle2),
            (self.bed, other.bed),
            (self.chamber, other.chamber),
        ]
        .into_iter()
        .filter_map(|(a, b)| Some((a? - b?).abs()))
        .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Humidity {
    pub slots: [Option<f64>; SLOT_COUNT],
    pub average: Option<f64>,
}

impl Humidity {
    /// Humidity of a 1-based slot.
    pub fn slot(&self, slot: u8) -> Option<f64> {
        let index = usize::from(slot).checked_sub(1)?;
        self.slots.get(index).copied().flatten()
    }

    fn from_ams(ams: &AmsReading) -> Self {
        match ams.mapping() {
            Some(mapping) => Self {
                slots: std::array::from_fn(|i| mapping.slots[i].humidity),
                average: mapping.average_humidity(),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Progress {
    pub percentage: Option<f64>,
    pub current_layer: Option<u32>,
    pub total_layers: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub state: PrinterState,
    /// Job state string exactly as the firmware reported it.
    pub vendor_state: Option<String>,
    pub job_name: Option<String>,
    pub filename: Option<String>,
}

/// Vendor error, passed through without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl VendorError {
    /// An error is reported when the code is present and not a zero value.
    pub fn from_values(values: &MetricValues) -> Option<Self> {
        let code = values.text(Metric::ErrorCode).filter(|c| !is_zero_code(c))?;
        Some(Self {
            code: Some(code.to_string()),
            message: values
                .text(Metric::ErrorMessage)
                .filter(|m| !is_zero_code(m))
                .map(str::to_string),
        })
    }
}

fn is_zero_code(code: &str) -> bool {
    code.parse::<f64>().is_ok_and(|n| n == 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilamentUsage {
    pub grams: Option<f64>,
    pub millimeters: Option<f64>,
}

impl FilamentUsage {
    pub fn from_values(values: &MetricValues) -> Option<Self> {
        let grams = values.number(Metric::FilamentGrams);
        let millimeters = values.number(Metric::FilamentMillimeters);
        (grams.is_some() || millimeters.is_some()).then_some(Self { grams, millimeters })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSnapshot {
    pub printer_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub temperatures: Temperatures,
    pub humidity: Humidity,
    pub progress: Progress,
    pub status: JobStatus,
    pub ams: AmsReading,
    pub error: Option<VendorError>,
    pub filament_usage: Option<FilamentUsage>,
}

impl NormalizedSnapshot {
    pub(crate) fn build(
        printer_id: &str,
        timestamp: OffsetDateTime,
        state: PrinterState,
        values: &MetricValues,
        ams: AmsReading,
    ) -> Self {
        let text = |m: Metric| values.text(m).map(str::to_string);
        Self {
            printer_id: printer_id.to_string(),
            timestamp,
            temperatures: Temperatures {
                nozzle1: values.number(Metric::Nozzle1),
                nozzle2: values.number(Metric::Nozzle2),
                bed: values.number(Metric::Bed),
                chamber: values.number(Metric::Chamber),
            },
            humidity: Humidity::from_ams(&ams),
            progress: Progress {
                percentage: values.number(Metric::Progress),
                current_layer: values.count(Metric::CurrentLayer),
                total_layers: values.count(Metric::TotalLayers),
            },
            status: JobStatus {
                state,
                vendor_state: text(Metric::VendorState),
                job_name: text(Metric::JobName),
                filename: text(Metric::Filename),
            },
            ams,
            error: VendorError::from_values(values),
            filament_usage: FilamentUsage::from_values(values),
        }
    }

    /// Equal readings, ignoring the receipt timestamp.
    pub fn same_readings(&self, other: &NormalizedSnapshot) -> bool {
        self.printer_id == other.printer_id
            && self.temperatures == other.temperatures
            && self.humidity == other.humidity
            && self.progress == other.progress
            && self.status == other.status
            && self.ams == other.ams
            && self.error == other.error
            && self.filament_usage == other.filament_usage
    }

    pub fn with_state(&self, state: PrinterState) -> Self {
        let mut next = self.clone();
        next.status.state = state;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricTable;
    use serde_json::json;
    use time::macros::datetime;

    fn values(payload: serde_json::Value) -> MetricValues {
        let table = MetricTable::builtin().unwrap();
        let mut values = MetricValues::default();
        values.apply(table.resolve_all(&payload), &table);
        values
    }

    #[test]
    fn test_build_keeps_absent_fields_absent() {
        let values = values(json!({"print": {"nozzle_temper": 0, "mc_percent": 12, "gcode_state": "RUNNING"}}));
        let snap = NormalizedSnapshot::build(
            "X1C-01",
            datetime!(2026-10-19 12:00 UTC),
            PrinterState::Printing,
            &values,
            AmsReading::Absent,
        );

        assert_eq!(snap.temperatures.nozzle1, Some(0.0));
        assert_eq!(snap.temperatures.bed, None);
        assert_eq!(snap.temperatures.chamber, None);
        assert_eq!(snap.progress.percentage, Some(12.0));
        assert_eq!(snap.progress.current_layer, None);
        assert_eq!(snap.status.vendor_state.as_deref(), Some("RUNNING"));
        assert_eq!(snap.humidity, Humidity::default());
        assert_eq!(snap.error, None);
        assert_eq!(snap.filament_usage, None);
    }

    #[test]
    fn test_vendor_error_pass_through() {
        let err = VendorError::from_values(&values(json!({"print": {"print_error": 50348044, "fail_reason": "0"}}))).unwrap();
        assert_eq!(err.code.as_deref(), Some("50348044"));
        assert_eq!(err.message, None);

        assert!(VendorError::from_values(&values(json!({"print": {"print_error": 0}}))).is_none());
        assert!(VendorError::from_values(&values(json!({"print": {"mc_print_error_code": "0"}}))).is_none());

        let hex = VendorError::from_values(&values(json!({"print": {"mc_print_error_code": "0300-8003"}}))).unwrap();
        assert_eq!(hex.code.as_deref(), Some("0300-8003"));
    }

    #[test]
    fn test_temperature_delta() {
        let a = Temperatures { nozzle1: Some(200.0), bed: Some(60.0), ..Default::default() };
        let b = Temperatures { nozzle1: Some(203.5), chamber: Some(30.0), bed: Some(59.0), ..Default::default() };
        assert_eq!(a.max_delta(&b), 3.5);
        assert_eq!(a.max_delta(&Temperatures::default()), 0.0);
    }

    #[test]
    fn test_serializes_timestamp_as_rfc3339() {
        let snap = NormalizedSnapshot::build(
            "P1S-02",
            datetime!(2026-10-19 08:30 UTC),
            PrinterState::Idle,
            &MetricValues::default(),
            AmsReading::Absent,
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["timestamp"], "2026-10-19T08:30:00Z");
        assert_eq!(json["status"]["state"], "idle");
        assert_eq!(json["ams"]["status"], "absent");
        assert!(json["temperatures"]["bed"].is_null());
    }
}
