//! Normalizer configuration.
//!
//! Every field has a default so an empty YAML/JSON section is valid.

use crate::metrics::Metric;
use crate::path::FieldPath;
use crate::resolver::ScaledEncoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What happens to a metric when a message omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep the last known value.
    #[default]
    Sticky,
    /// Mark the metric absent.
    FreshOnly,
}

/// Scope of the "last raw message" debug slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawCapture {
    #[default]
    Global,
    PerPrinter,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventThresholds {
    /// Progress points (0-100) between two `progress_update` events.
    pub min_progress_delta: f64,
    /// Degrees on any temperature between two `progress_update` events.
    pub min_temperature_delta: f64,
    /// Any change is reported once this much time passed since the last update.
    pub min_interval_secs: u64,
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            min_progress_delta: 1.0,
            min_temperature_delta: 2.0,
            min_interval_secs: 30,
        }
    }
}

impl EventThresholds {
    pub fn min_interval(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.min_interval_secs).unwrap_or(i64::MAX))
    }
}

/// Per-metric adjustments on top of the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricOverride {
    pub retention: Option<Retention>,
    pub scale: Option<ScaledEncoding>,
    /// Drops the built-in scaled encoding, if any.
    pub no_scale: bool,
    /// Tried before the built-in candidates.
    pub prepend_paths: Vec<FieldPath>,
    /// Tried after the built-in candidates.
    pub append_paths: Vec<FieldPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub events: EventThresholds,
    pub raw_capture: RawCapture,
    /// Apply the AMS unit humidity to every slot when trays carry none.
    pub spread_unit_humidity: bool,
    /// Retention of the AMS reading when a message carries no AMS sub-tree.
    pub ams_retention: Retention,
    pub metrics: HashMap<Metric, MetricOverride>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            events: EventThresholds::default(),
            raw_capture: RawCapture::Global,
            spread_unit_humidity: true,
            ams_retention: Retention::Sticky,
            metrics: HashMap::new(),
        }
    }
}

impl NormalizerConfig {
    /// Sets the retention of every metric and of the AMS reading at once.
    pub fn with_uniform_retention(mut self, retention: Retention) -> Self {
        for metric in Metric::ALL {
            self.metrics.entry(metric).or_default().retention = Some(retention);
        }
        self.ams_retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_section_uses_defaults() {
        let cfg: NormalizerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, NormalizerConfig::default());
        assert_eq!(cfg.events.min_interval(), time::Duration::seconds(30));
        assert!(cfg.spread_unit_humidity);
    }

    #[test]
    fn test_metric_overrides_deserialize() {
        let cfg: NormalizerConfig = serde_json::from_value(serde_json::json!({
            "raw_capture": "per_printer",
            "events": {"min_progress_delta": 5.0},
            "metrics": {
                "chamber": {
                    "retention": "fresh_only",
                    "scale": {"above": 1000.0, "divisor": 10.0},
                    "prepend_paths": ["print.device.chamber.temp"]
                }
            }
        }))
        .unwrap();

        assert_eq!(cfg.raw_capture, RawCapture::PerPrinter);
        assert_eq!(cfg.events.min_progress_delta, 5.0);
        assert_eq!(cfg.events.min_interval_secs, 30);

        let chamber = &cfg.metrics[&Metric::Chamber];
        assert_eq!(chamber.retention, Some(Retention::FreshOnly));
        assert_eq!(chamber.scale, Some(ScaledEncoding { above: 1000.0, divisor: 10.0 }));
        assert_eq!(chamber.prepend_paths[0].as_str(), "print.device.chamber.temp");
    }

    #[test]
    fn test_uniform_retention() {
        let cfg = NormalizerConfig::default().with_uniform_retention(Retention::FreshOnly);
        assert_eq!(cfg.ams_retention, Retention::FreshOnly);
        assert!(Metric::ALL
            .iter()
            .all(|m| cfg.metrics[m].retention == Some(Retention::FreshOnly)));
    }
}
