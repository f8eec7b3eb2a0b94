//! Declarative metric table.
//!
//! Each metric maps to an ordered list of candidate paths, a plausibility
//! check, an optional scaled encoding and a retention policy. A newly found
//! vendor path is a new row entry (or a config override), not new logic.

use crate::config::{NormalizerConfig, Retention};
use crate::error::Result;
use crate::path::FieldPath;
use crate::resolver::{resolve, FieldValue, Plausibility, Resolved, ScaledEncoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Nozzle1,
    Nozzle2,
    Bed,
    Chamber,
    Progress,
    CurrentLayer,
    TotalLayers,
    VendorState,
    JobName,
    Filename,
    ErrorCode,
    ErrorMessage,
    FilamentGrams,
    FilamentMillimeters,
}

impl Metric {
    pub const ALL: [Metric; 14] = [
        Metric::Nozzle1,
        Metric::Nozzle2,
        Metric::Bed,
        Metric::Chamber,
        Metric::Progress,
        Metric::CurrentLayer,
        Metric::TotalLayers,
        Metric::VendorState,
        Metric::JobName,
        Metric::Filename,
        Metric::ErrorCode,
        Metric::ErrorMessage,
        Metric::FilamentGrams,
        Metric::FilamentMillimeters,
    ];
}

struct Row {
    metric: Metric,
    paths: &'static [&'static str],
    check: Plausibility,
    scale: Option<ScaledEncoding>,
}

const TEMPERATURE: Plausibility = Plausibility::range(-20.0, 350.0);

// Device-info structures first, legacy flat fields after.
const BUILTIN: &[Row] = &[
    Row {
        metric: Metric::Nozzle1,
        paths: &["print.device.extruder.info[0].temp", "print.nozzle_temper", "nozzle_temper"],
        check: TEMPERATURE,
        scale: None,
    },
    Row {
        metric: Metric::Nozzle2,
        paths: &["print.device.extruder.info[1].temp", "print.nozzle_temper_2"],
        check: TEMPERATURE,
        scale: None,
    },
    Row {
        metric: Metric::Bed,
        paths: &["print.device.bed.info.temp", "print.bed_temper", "bed_temper"],
        check: Plausibility::range(-20.0, 150.0),
        scale: None,
    },
    Row {
        metric: Metric::Chamber,
        paths: &["print.device.ctc.info.temp", "print.chamber_temper", "chamber_temper"],
        check: Plausibility::range(-20.0, 100.0),
        scale: Some(ScaledEncoding::CHAMBER),
    },
    Row {
        metric: Metric::Progress,
        paths: &["print.mc_percent", "mc_percent", "status.progress"],
        check: Plausibility::range(0.0, 100.0),
        scale: None,
    },
    Row {
        metric: Metric::CurrentLayer,
        paths: &["print.layer_num", "layer_num"],
        check: Plausibility::range(0.0, 1_000_000.0),
        scale: None,
    },
    Row {
        metric: Metric::TotalLayers,
        paths: &["print.total_layer_num", "total_layer_num"],
        check: Plausibility::range(0.0, 1_000_000.0),
        scale: None,
    },
    Row {
        metric: Metric::VendorState,
        paths: &["print.gcode_state", "status.gcode_state", "gcode_state"],
        check: Plausibility::Text,
        scale: None,
    },
    Row {
        metric: Metric::JobName,
        paths: &["print.subtask_name", "subtask_name", "status.job_name"],
        check: Plausibility::Text,
        scale: None,
    },
    Row {
        metric: Metric::Filename,
        paths: &["print.gcode_file", "gcode_file", "status.filename"],
        check: Plausibility::Text,
        scale: None,
    },
    Row {
        metric: Metric::ErrorCode,
        paths: &["print.print_error", "print_error", "print.mc_print_error_code", "status.error_code"],
        check: Plausibility::Text,
        scale: None,
    },
    Row {
        metric: Metric::ErrorMessage,
        paths: &["print.fail_reason", "print.error_message", "status.error_message"],
        check: Plausibility::Text,
        scale: None,
    },
    Row {
        metric: Metric::FilamentGrams,
        paths: &["print.filament_used_g", "print.job.filament_used_g", "filament_used_g"],
        check: Plausibility::range(0.0, 100_000.0),
        scale: None,
    },
    Row {
        metric: Metric::FilamentMillimeters,
        paths: &["print.filament_used_mm", "print.job.filament_used_mm", "filament_used_mm"],
        check: Plausibility::range(0.0, 1.0e9),
        scale: None,
    },
];

#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub metric: Metric,
    pub candidates: Vec<FieldPath>,
    pub check: Plausibility,
    pub scale: Option<ScaledEncoding>,
    pub retention: Retention,
}

impl MetricSpec {
    pub fn resolve(&self, payload: &Value) -> Option<Resolved> {
        let resolved = resolve(payload, &self.candidates, &self.check, self.scale);
        if let Some(r) = &resolved {
            trace!(metric = ?self.metric, path = %r.path, "metric resolved");
        }
        resolved
    }
}

#[derive(Debug, Clone)]
pub struct MetricTable {
    specs: HashMap<Metric, MetricSpec>,
}

impl MetricTable {
    pub fn builtin() -> Result<Self> {
        let mut specs = HashMap::with_capacity(BUILTIN.len());
        for row in BUILTIN {
            let candidates = row
                .paths
                .iter()
                .map(|p| FieldPath::parse(p))
                .collect::<Result<Vec<_>>>()?;
            specs.insert(
                row.metric,
                MetricSpec {
                    metric: row.metric,
                    candidates,
                    check: row.check.clone(),
                    scale: row.scale,
                    retention: Retention::Sticky,
                },
            );
        }
        Ok(Self { specs })
    }

    pub fn from_config(config: &NormalizerConfig) -> Result<Self> {
        let mut table = Self::builtin()?;
        for (metric, ov) in &config.metrics {
            let Some(spec) = table.specs.get_mut(metric) else {
                continue;
            };
            if let Some(retention) = ov.retention {
                spec.retention = retention;
            }
            if ov.no_scale {
                spec.scale = None;
            }
            if let Some(scale) = ov.scale {
                spec.scale = Some(scale);
            }
            if !ov.prepend_paths.is_empty() || !ov.append_paths.is_empty() {
                let builtin = std::mem::take(&mut spec.candidates);
                spec.candidates = ov
                    .prepend_paths
                    .iter()
                    .cloned()
                    .chain(builtin)
                    .chain(ov.append_paths.iter().cloned())
                    .collect();
            }
        }
        Ok(table)
    }

    pub fn spec(&self, metric: Metric) -> Option<&MetricSpec> {
        self.specs.get(&metric)
    }

    pub fn retention(&self, metric: Metric) -> Retention {
        self.specs
            .get(&metric)
            .map_or(Retention::Sticky, |s| s.retention)
    }

    pub fn resolve(&self, metric: Metric, payload: &Value) -> Option<Resolved> {
        self.specs.get(&metric)?.resolve(payload)
    }

    /// Resolves every metric present in the payload.
    pub fn resolve_all(&self, payload: &Value) -> HashMap<Metric, Resolved> {
        Metric::ALL
            .iter()
            .filter_map(|m| self.resolve(*m, payload).map(|r| (*m, r)))
            .collect()
    }
}

/// Last known value of every metric for one printer, after retention.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricValues {
    values: HashMap<Metric, FieldValue>,
}

impl MetricValues {
    /// Applies one message: resolved metrics overwrite, missing ones follow their retention.
    pub fn apply(&mut self, fresh: HashMap<Metric, Resolved>, table: &MetricTable) {
        let mut fresh = fresh;
        for metric in Metric::ALL {
            match fresh.remove(&metric) {
                Some(resolved) => {
                    self.values.insert(metric, resolved.value);
                }
                None if table.retention(metric) == Retention::FreshOnly => {
                    self.values.remove(&metric);
                }
                None => {}
            }
        }
    }

    pub fn number(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).and_then(FieldValue::as_f64)
    }

    pub fn text(&self, metric: Metric) -> Option<&str> {
        self.values.get(&metric).and_then(FieldValue::as_str)
    }

    pub fn count(&self, metric: Metric) -> Option<u32> {
        self.number(metric)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricOverride;
    use serde_json::json;

    #[test]
    fn test_builtin_covers_every_metric() {
        let table = MetricTable::builtin().unwrap();
        for metric in Metric::ALL {
            let spec = table.spec(metric).unwrap();
            assert!(!spec.candidates.is_empty(), "{metric:?}");
            assert_eq!(spec.retention, Retention::Sticky);
        }
        assert_eq!(table.spec(Metric::Chamber).unwrap().scale, Some(ScaledEncoding::CHAMBER));
        assert_eq!(table.spec(Metric::Nozzle1).unwrap().scale, None);
    }

    #[test]
    fn test_temperature_path_transparency() {
        let table = MetricTable::builtin().unwrap();
        let variants = [
            json!({"print": {"device": {"ctc": {"info": {"temp": 41}}}}}),
            json!({"print": {"chamber_temper": 41}}),
            json!({"chamber_temper": "41"}),
            json!({"print": {"device": {"ctc": {"info": {"temp": 4_100_000}}}}}),
        ];
        for payload in &variants {
            let resolved = table.resolve(Metric::Chamber, payload).unwrap();
            assert_eq!(resolved.value, FieldValue::Number(41.0), "{payload}");
        }
    }

    #[test]
    fn test_config_adds_paths_and_changes_scaling() {
        let mut config = NormalizerConfig::default();
        config.metrics.insert(
            Metric::Chamber,
            MetricOverride {
                no_scale: true,
                prepend_paths: vec![FieldPath::parse("print.device.chamber[0]").unwrap()],
                append_paths: vec![FieldPath::parse("env.chamber").unwrap()],
                ..Default::default()
            },
        );
        let table = MetricTable::from_config(&config).unwrap();
        let spec = table.spec(Metric::Chamber).unwrap();

        assert_eq!(spec.scale, None);
        assert_eq!(spec.candidates.first().unwrap().as_str(), "print.device.chamber[0]");
        assert_eq!(spec.candidates.last().unwrap().as_str(), "env.chamber");

        let resolved = table.resolve(Metric::Chamber, &json!({"env": {"chamber": 33}})).unwrap();
        assert_eq!(resolved.path, "env.chamber");
    }

    #[test]
    fn test_values_retention() {
        let mut config = NormalizerConfig::default();
        config.metrics.insert(
            Metric::Chamber,
            MetricOverride {
                retention: Some(Retention::FreshOnly),
                ..Default::default()
            },
        );
        let table = MetricTable::from_config(&config).unwrap();

        let mut values = MetricValues::default();
        values.apply(
            table.resolve_all(&json!({"print": {"bed_temper": 60, "chamber_temper": 30}})),
            &table,
        );
        values.apply(table.resolve_all(&json!({"print": {"nozzle_temper": 210}})), &table);

        assert_eq!(values.number(Metric::Bed), Some(60.0));
        assert_eq!(values.number(Metric::Chamber), None);
        assert_eq!(values.number(Metric::Nozzle1), Some(210.0));
    }

    #[test]
    fn test_layer_counts() {
        let table = MetricTable::builtin().unwrap();
        let mut values = MetricValues::default();
        values.apply(
            table.resolve_all(&json!({"print": {"layer_num": "12", "total_layer_num": 240}})),
            &table,
        );
        assert_eq!(values.count(Metric::CurrentLayer), Some(12));
        assert_eq!(values.count(Metric::TotalLayers), Some(240));
    }
}
