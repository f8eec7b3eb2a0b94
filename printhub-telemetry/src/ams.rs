//! AMS slot mapper.
//!
//! Locates the AMS sub-tree (its position differs across firmware), maps the
//! vendor's 0-based tray indices to user-facing slots 1-4 and derives
//! per-slot occupancy and humidity.
//!
//! Humidity: an AMS unit has a single humidity sensor, so when the trays carry
//! no reading of their own the unit value is applied to every slot. This is a
//! known approximation of the hardware, not a per-slot measurement. Firmware
//! that reports humidity per tray overrides it automatically.

use crate::error::Result;
use crate::path::{as_number, FieldPath};
use crate::resolver::{resolve_candidates, Plausibility, Resolved};
use serde::Serialize;
use serde_json::Value;

pub const SLOT_COUNT: usize = 4;

/// Tray `state` value the vendor uses for an empty tray.
pub const EMPTY_TRAY_STATE: f64 = 11.0;

/// Maps a vendor tray index to a logical slot: `0..=3` become `1..=4`.
pub fn slot_for_tray(tray_index: i64) -> Option<u8> {
    (0..SLOT_COUNT as i64)
        .contains(&tray_index)
        .then(|| tray_index as u8 + 1)
}

/// Where the AMS sub-tree was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmsLocation {
    /// `print.ams.ams[]`
    PrintNested,
    /// `ams.ams[]`
    TopLevelNested,
    /// `print.ams[]` or `ams[]`
    BareArray,
    /// `print.ams` or `ams` holding a `tray` array directly
    SingleObject,
    /// An `ams` key exists but none of the known shapes matched.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotRef {
    Mapped { slot: u8 },
    /// No slot asserted; `raw` keeps what the firmware sent, if anything.
    Unmapped { raw: Option<String> },
}

impl SlotRef {
    pub fn slot(&self) -> Option<u8> {
        match self {
            Self::Mapped { slot } => Some(*slot),
            Self::Unmapped { .. } => None,
        }
    }

    fn from_resolved(resolved: Option<&Resolved>, raw: Option<&Value>) -> Self {
        let mapped = resolved
            .and_then(|r| r.value.as_f64())
            .filter(|v| v.fract() == 0.0)
            .and_then(|v| slot_for_tray(v as i64));
        match mapped {
            Some(slot) => Self::Mapped { slot },
            None => Self::Unmapped {
                raw: raw.map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Occupied,
    Empty,
    Unknown,
}

impl Occupancy {
    /// Occupied when `remain > 0` or `state != 11`; firmware reliably fills one or the other.
    pub fn classify(remain: Option<f64>, state: Option<f64>) -> Self {
        if remain.is_none() && state.is_none() {
            return Self::Unknown;
        }
        let has_material = remain.is_some_and(|r| r > 0.0);
        let not_empty = state.is_some_and(|s| s != EMPTY_TRAY_STATE);
        if has_material || not_empty {
            Self::Occupied
        } else {
            Self::Empty
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotStatus {
    pub slot: u8,
    pub tray_index: u8,
    pub occupancy: Occupancy,
    pub remain: Option<f64>,
    pub humidity: Option<f64>,
    pub active: bool,
}

impl SlotStatus {
    fn unknown(tray_index: u8) -> Self {
        Self {
            slot: tray_index + 1,
            tray_index,
            occupancy: Occupancy::Unknown,
            remain: None,
            humidity: None,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HumiditySource {
    PerSlot,
    UnitWide,
    Unreported,
}

/// Which structural paths produced the mapping, for field debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmsTrace {
    pub location: AmsLocation,
    pub tray_now_from: Option<String>,
    pub humidity_from: Option<String>,
    pub tray_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotMapping {
    pub active: SlotRef,
    pub previous: SlotRef,
    pub target: SlotRef,
    pub slots: [SlotStatus; SLOT_COUNT],
    pub unit_humidity: Option<f64>,
    pub humidity_source: HumiditySource,
    pub trace: AmsTrace,
}

impl SlotMapping {
    pub fn slot(&self, slot: u8) -> Option<&SlotStatus> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    /// Mean of the slot humidity values that are present.
    pub fn average_humidity(&self) -> Option<f64> {
        let readings: Vec<f64> = self.slots.iter().filter_map(|s| s.humidity).collect();
        if readings.is_empty() {
            return self.unit_humidity;
        }
        Some(readings.iter().sum::<f64>() / readings.len() as f64)
    }
}

/// Outcome of AMS mapping: "feature absent" is distinct from "present, indeterminate".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "mapping", rename_all = "snake_case")]
pub enum AmsReading {
    Absent,
    Present(SlotMapping),
}

impl AmsReading {
    pub fn mapping(&self) -> Option<&SlotMapping> {
        match self {
            Self::Present(m) => Some(m),
            Self::Absent => None,
        }
    }
}

struct Located<'a> {
    location: AmsLocation,
    parent: Option<&'a Value>,
    units: Vec<&'a Value>,
}

#[derive(Debug, Clone)]
pub struct AmsMapper {
    spread_unit_humidity: bool,
    tray_now: FieldPath,
    tray_pre: FieldPath,
    tray_tar: FieldPath,
    humidity_raw: FieldPath,
    humidity: FieldPath,
    remain: FieldPath,
    state: FieldPath,
    id: FieldPath,
}

impl AmsMapper {
    pub fn new(spread_unit_humidity: bool) -> Result<Self> {
        Ok(Self {
            spread_unit_humidity,
            tray_now: FieldPath::parse("tray_now")?,
            tray_pre: FieldPath::parse("tray_pre")?,
            tray_tar: FieldPath::parse("tray_tar")?,
            humidity_raw: FieldPath::parse("humidity_raw")?,
            humidity: FieldPath::parse("humidity")?,
            remain: FieldPath::parse("remain")?,
            state: FieldPath::parse("state")?,
            id: FieldPath::parse("id")?,
        })
    }

    pub fn map(&self, payload: &Value) -> AmsReading {
        let Some(located) = locate(payload) else {
            return AmsReading::Absent;
        };

        let unit = located.units.first().copied();
        // Unit first, then the parent AMS object where some firmware hoists the field.
        let scopes: Vec<&Value> = unit.into_iter().chain(located.parent).collect();

        let (now, now_raw) = tray_field(&scopes, &self.tray_now);
        let (pre, pre_raw) = tray_field(&scopes, &self.tray_pre);
        let (tar, tar_raw) = tray_field(&scopes, &self.tray_tar);
        let active = SlotRef::from_resolved(now.as_ref(), now_raw);
        let previous = SlotRef::from_resolved(pre.as_ref(), pre_raw);
        let target = SlotRef::from_resolved(tar.as_ref(), tar_raw);

        let percent = Plausibility::range(0.0, 100.0);
        let unit_humidity = resolve_candidates(
            scopes
                .iter()
                .map(|s| (*s, &self.humidity_raw))
                .chain(scopes.iter().map(|s| (*s, &self.humidity))),
            &percent,
            None,
        );

        let trays = unit
            .and_then(|u| u.get("tray"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut slots: [SlotStatus; SLOT_COUNT] =
            std::array::from_fn(|i| SlotStatus::unknown(i as u8));
        let mut per_slot_humidity = false;

        for (position, tray) in trays.iter().enumerate() {
            if !tray.is_object() {
                continue;
            }
            let tray_index = self
                .id
                .lookup(tray)
                .and_then(as_number)
                .filter(|v| v.fract() == 0.0)
                .map_or(position as i64, |v| v as i64);
            let Some(slot) = slot_for_tray(tray_index) else {
                continue;
            };
            let entry = &mut slots[usize::from(slot - 1)];
            entry.remain = self.remain.lookup(tray).and_then(as_number);
            entry.occupancy = Occupancy::classify(entry.remain, self.state.lookup(tray).and_then(as_number));
            entry.humidity = resolve_candidates(
                [(tray, &self.humidity_raw), (tray, &self.humidity)],
                &percent,
                None,
            )
            .and_then(|r| r.value.as_f64());
            per_slot_humidity |= entry.humidity.is_some();
        }

        if let Some(slot) = active.slot() {
            let entry = &mut slots[usize::from(slot - 1)];
            entry.active = true;
            // Active tray details hoisted to the unit.
            if entry.occupancy == Occupancy::Unknown {
                let remain = unit.and_then(|u| self.remain.lookup(u)).and_then(as_number);
                let state = unit.and_then(|u| self.state.lookup(u)).and_then(as_number);
                entry.remain = remain;
                entry.occupancy = Occupancy::classify(remain, state);
            }
        }

        let unit_value = unit_humidity.as_ref().and_then(|r| r.value.as_f64());
        let humidity_source = if per_slot_humidity {
            HumiditySource::PerSlot
        } else if let Some(value) = unit_value {
            if self.spread_unit_humidity {
                for entry in slots.iter_mut() {
                    entry.humidity = Some(value);
                }
            }
            HumiditySource::UnitWide
        } else {
            HumiditySource::Unreported
        };

        let trace = AmsTrace {
            location: located.location,
            tray_now_from: now.map(|r| scope_label(r.candidate, unit.is_some(), &r.path)),
            humidity_from: unit_humidity.map(|r| {
                let scope = r.candidate % scopes.len().max(1);
                scope_label(scope, unit.is_some(), &r.path)
            }),
            tray_entries: trays.len(),
        };

        AmsReading::Present(SlotMapping {
            active,
            previous,
            target,
            slots,
            unit_humidity: unit_value,
            humidity_source,
            trace,
        })
    }
}

/// Resolves a tray index field across scopes, keeping the raw value for diagnostics.
fn tray_field<'a>(scopes: &[&'a Value], path: &FieldPath) -> (Option<Resolved>, Option<&'a Value>) {
    let index = Plausibility::range(i64::MIN as f64, i64::MAX as f64);
    let resolved = resolve_candidates(scopes.iter().map(|s| (*s, path)), &index, None);
    let raw = scopes.iter().find_map(|s| path.lookup(*s));
    (resolved, raw)
}

fn scope_label(scope: usize, has_unit: bool, path: &str) -> String {
    if scope == 0 && has_unit {
        format!("unit.{path}")
    } else {
        format!("parent.{path}")
    }
}

fn first_is_object(value: &Value) -> bool {
    value
        .as_array()
        .and_then(|a| a.first())
        .is_some_and(Value::is_object)
}

fn units_of(array: &Value) -> Vec<&Value> {
    array
        .as_array()
        .map(|a| a.iter().filter(|u| u.is_object()).collect())
        .unwrap_or_default()
}

fn locate(payload: &Value) -> Option<Located<'_>> {
    let print_ams = payload.get("print").and_then(|p| p.get("ams"));
    let top_ams = payload.get("ams");

    // (a) nested under print
    if let Some(parent) = print_ams {
        if let Some(units) = parent.get("ams").filter(|u| first_is_object(u)) {
            return Some(Located {
                location: AmsLocation::PrintNested,
                parent: Some(parent),
                units: units_of(units),
            });
        }
    }

    // (b) top level wrapped, then bare arrays with print first
    if let Some(parent) = top_ams {
        if let Some(units) = parent.get("ams").filter(|u| first_is_object(u)) {
            return Some(Located {
                location: AmsLocation::TopLevelNested,
                parent: Some(parent),
                units: units_of(units),
            });
        }
    }
    for candidate in [print_ams, top_ams].into_iter().flatten() {
        if first_is_object(candidate) {
            return Some(Located {
                location: AmsLocation::BareArray,
                parent: None,
                units: units_of(candidate),
            });
        }
    }

    // (c) a single unit not wrapped in an array
    for candidate in [print_ams, top_ams].into_iter().flatten() {
        if candidate.get("tray").is_some_and(Value::is_array) {
            return Some(Located {
                location: AmsLocation::SingleObject,
                parent: Some(candidate),
                units: vec![candidate],
            });
        }
    }

    let present = [print_ams, top_ams].into_iter().flatten().find(|v| !v.is_null())?;
    Some(Located {
        location: AmsLocation::Unrecognized,
        parent: present.is_object().then_some(present),
        units: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> AmsMapper {
        AmsMapper::new(true).unwrap()
    }

    fn present(reading: AmsReading) -> SlotMapping {
        match reading {
            AmsReading::Present(m) => m,
            AmsReading::Absent => panic!("expected AMS data"),
        }
    }

    #[test]
    fn test_slot_for_tray_range() {
        for v in 0..=3 {
            assert_eq!(slot_for_tray(v), Some(v as u8 + 1));
        }
        for v in [-1, 4, 254, 255, i64::MAX, i64::MIN] {
            assert_eq!(slot_for_tray(v), None);
        }
    }

    #[test]
    fn test_active_tray_with_hoisted_remain() {
        let payload = json!({"print": {"ams": {"ams": [{"tray_now": "2", "remain": 45}]}}});
        let mapping = present(mapper().map(&payload));

        assert_eq!(mapping.active, SlotRef::Mapped { slot: 3 });
        let slot3 = mapping.slot(3).unwrap();
        assert!(slot3.active);
        assert_eq!(slot3.occupancy, Occupancy::Occupied);
        assert_eq!(slot3.remain, Some(45.0));
        for other in [1, 2, 4] {
            let s = mapping.slot(other).unwrap();
            assert_eq!(s.occupancy, Occupancy::Unknown);
            assert!(!s.active);
        }
        assert_eq!(mapping.humidity_source, HumiditySource::Unreported);
        assert!(mapping.slots.iter().all(|s| s.humidity.is_none()));
        assert_eq!(mapping.average_humidity(), None);
        assert_eq!(mapping.trace.location, AmsLocation::PrintNested);
        assert_eq!(mapping.trace.tray_now_from.as_deref(), Some("unit.tray_now"));
    }

    #[test]
    fn test_tray_fields_hoisted_to_parent() {
        let payload = json!({"print": {"ams": {
            "ams": [{"id": "0", "humidity": "4", "tray": [{"id": "0", "remain": 80}]}],
            "tray_now": "0", "tray_pre": "3", "tray_tar": "255"
        }}});
        let mapping = present(mapper().map(&payload));

        assert_eq!(mapping.active, SlotRef::Mapped { slot: 1 });
        assert_eq!(mapping.previous, SlotRef::Mapped { slot: 4 });
        assert_eq!(mapping.target, SlotRef::Unmapped { raw: Some("255".into()) });
        assert_eq!(mapping.trace.tray_now_from.as_deref(), Some("parent.tray_now"));
    }

    #[test]
    fn test_out_of_range_and_missing_tray_now_are_unmapped() {
        for tray_now in [json!("255"), json!(4), json!(-1), json!("1.5"), json!("abc")] {
            let payload = json!({"ams": {"ams": [{"tray_now": tray_now}]}});
            let mapping = present(mapper().map(&payload));
            assert!(mapping.active.slot().is_none(), "{payload}");
            assert!(mapping.slots.iter().all(|s| !s.active));
        }

        let mapping = present(mapper().map(&json!({"ams": {"ams": [{"tray": []}]}})));
        assert_eq!(mapping.active, SlotRef::Unmapped { raw: None });
    }

    #[test]
    fn test_location_order() {
        let cases = [
            (json!({"print": {"ams": {"ams": [{"tray_now": "1"}]}}, "ams": [{"tray_now": "3"}]}), AmsLocation::PrintNested, 2),
            (json!({"ams": {"ams": [{"tray_now": "1"}]}}), AmsLocation::TopLevelNested, 2),
            (json!({"ams": [{"tray_now": "2"}]}), AmsLocation::BareArray, 3),
            (json!({"print": {"ams": [{"tray_now": "0"}]}}), AmsLocation::BareArray, 1),
            (json!({"print": {"ams": [{"tray_now": "0"}]}, "ams": [{"tray_now": "2"}]}), AmsLocation::BareArray, 1),
            (json!({"print": {"ams": {"tray_now": "3", "tray": [{"id": "3", "state": 3}]}}}), AmsLocation::SingleObject, 4),
        ];
        for (payload, location, slot) in cases {
            let mapping = present(mapper().map(&payload));
            assert_eq!(mapping.trace.location, location, "{payload}");
            assert_eq!(mapping.active.slot(), Some(slot), "{payload}");
        }
    }

    #[test]
    fn test_absent_versus_unrecognized() {
        assert_eq!(mapper().map(&json!({"print": {"bed_temper": 60}})), AmsReading::Absent);
        assert_eq!(mapper().map(&json!({"print": {"ams": null}})), AmsReading::Absent);

        let mapping = present(mapper().map(&json!({"print": {"ams": {"version": 7}}})));
        assert_eq!(mapping.trace.location, AmsLocation::Unrecognized);
        assert!(mapping.active.slot().is_none());
        assert!(mapping.slots.iter().all(|s| s.occupancy == Occupancy::Unknown));
    }

    #[test]
    fn test_occupancy_rule() {
        assert_eq!(Occupancy::classify(Some(45.0), None), Occupancy::Occupied);
        assert_eq!(Occupancy::classify(Some(0.0), Some(11.0)), Occupancy::Empty);
        assert_eq!(Occupancy::classify(Some(-1.0), Some(3.0)), Occupancy::Occupied);
        assert_eq!(Occupancy::classify(None, Some(11.0)), Occupancy::Empty);
        assert_eq!(Occupancy::classify(Some(0.0), None), Occupancy::Empty);
        assert_eq!(Occupancy::classify(None, None), Occupancy::Unknown);
    }

    #[test]
    fn test_tray_entries_by_id() {
        let payload = json!({"print": {"ams": {"ams": [{"tray": [
            {"id": "2", "remain": 0, "state": 11},
            {"id": "0", "remain": 70},
            {"id": "7", "remain": 10},
            {"remain": 5}
        ]}]}}});
        let mapping = present(mapper().map(&payload));

        assert_eq!(mapping.slot(1).unwrap().occupancy, Occupancy::Occupied);
        assert_eq!(mapping.slot(3).unwrap().occupancy, Occupancy::Empty);
        // No id: falls back to array position 3.
        assert_eq!(mapping.slot(4).unwrap().remain, Some(5.0));
        assert_eq!(mapping.slot(2).unwrap().occupancy, Occupancy::Unknown);
        assert_eq!(mapping.trace.tray_entries, 4);
    }

    #[test]
    fn test_unit_humidity_spreads_to_all_slots() {
        let payload = json!({"print": {"ams": {"ams": [{"humidity": "4", "humidity_raw": "38"}]}}});
        let mapping = present(mapper().map(&payload));

        assert_eq!(mapping.unit_humidity, Some(38.0));
        assert_eq!(mapping.humidity_source, HumiditySource::UnitWide);
        assert!(mapping.slots.iter().all(|s| s.humidity == Some(38.0)));
        assert_eq!(mapping.average_humidity(), Some(38.0));
        assert_eq!(mapping.trace.humidity_from.as_deref(), Some("unit.humidity_raw"));

        let fallback = present(mapper().map(&json!({"print": {"ams": {"ams": [{"humidity": "4"}]}}})));
        assert_eq!(fallback.unit_humidity, Some(4.0));

        let unspread = present(AmsMapper::new(false).unwrap().map(&payload));
        assert!(unspread.slots.iter().all(|s| s.humidity.is_none()));
        assert_eq!(unspread.average_humidity(), Some(38.0));
    }

    #[test]
    fn test_per_slot_humidity_overrides_unit() {
        let payload = json!({"print": {"ams": {"ams": [{"humidity_raw": "40", "tray": [
            {"id": "0", "humidity_raw": 30},
            {"id": "1", "humidity": 50}
        ]}]}}});
        let mapping = present(mapper().map(&payload));

        assert_eq!(mapping.humidity_source, HumiditySource::PerSlot);
        assert_eq!(mapping.slot(1).unwrap().humidity, Some(30.0));
        assert_eq!(mapping.slot(2).unwrap().humidity, Some(50.0));
        assert_eq!(mapping.slot(3).unwrap().humidity, None);
        assert_eq!(mapping.average_humidity(), Some(40.0));
    }
}
