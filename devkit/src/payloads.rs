/*!
Status payload builders for the firmware layouts seen in the field

The same readings can be rendered in every layout, which is what
path-transparency tests need.
*/

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    /// `print.nozzle_temper`, `print.bed_temper`, ... flat under `print`.
    Legacy,
    /// Newer firmware: temperatures under `print.device.*.info`, chamber scaled.
    DeviceInfo,
    /// No `print` wrapper: fields and `ams` at the top level.
    Flat,
}

impl Firmware {
    pub const ALL: [Firmware; 3] = [Firmware::Legacy, Firmware::DeviceInfo, Firmware::Flat];
}

/// Topic a printer publishes its status on.
pub fn report_topic(serial: &str) -> String {
    format!("device/{serial}/report")
}

#[derive(Debug, Clone, Default)]
struct AmsUnit {
    tray_now: Option<Value>,
    humidity: Option<Value>,
    trays: Vec<Value>,
}

/// Builds one `push_status` report.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    firmware: Firmware,
    sequence_id: u64,
    nozzles: [Option<f64>; 2],
    bed: Option<f64>,
    chamber: Option<f64>,
    progress: Option<Value>,
    layers: Option<(u32, u32)>,
    gcode_state: Option<String>,
    subtask_name: Option<String>,
    gcode_file: Option<String>,
    print_error: Option<Value>,
    fail_reason: Option<String>,
    filament: Option<(f64, f64)>,
    ams: Option<AmsUnit>,
    extra: Vec<(String, Value)>,
}

impl ReportBuilder {
    pub fn new(firmware: Firmware) -> Self {
        Self {
            firmware,
            sequence_id: 0,
            nozzles: [None; 2],
            bed: None,
            chamber: None,
            progress: None,
            layers: None,
            gcode_state: None,
            subtask_name: None,
            gcode_file: None,
            print_error: None,
            fail_reason: None,
            filament: None,
            ams: None,
            extra: Vec::new(),
        }
    }

    pub fn sequence(mut self, id: u64) -> Self {
        self.sequence_id = id;
        self
    }

    pub fn nozzle(mut self, celsius: f64) -> Self {
        self.nozzles[0] = Some(celsius);
        self
    }

    /// Second extruder; the flat layout has no field for it.
    pub fn nozzle2(mut self, celsius: f64) -> Self {
        self.nozzles[1] = Some(celsius);
        self
    }

    pub fn bed(mut self, celsius: f64) -> Self {
        self.bed = Some(celsius);
        self
    }

    pub fn chamber(mut self, celsius: f64) -> Self {
        self.chamber = Some(celsius);
        self
    }

    pub fn progress(mut self, percent: impl Into<Value>) -> Self {
        self.progress = Some(percent.into());
        self
    }

    pub fn layers(mut self, current: u32, total: u32) -> Self {
        self.layers = Some((current, total));
        self
    }

    pub fn state(mut self, gcode_state: &str) -> Self {
        self.gcode_state = Some(gcode_state.to_string());
        self
    }

    pub fn job(mut self, subtask_name: &str, gcode_file: &str) -> Self {
        self.subtask_name = Some(subtask_name.to_string());
        self.gcode_file = Some(gcode_file.to_string());
        self
    }

    pub fn error(mut self, code: impl Into<Value>, message: Option<&str>) -> Self {
        self.print_error = Some(code.into());
        self.fail_reason = message.map(str::to_string);
        self
    }

    pub fn filament(mut self, grams: f64, millimeters: f64) -> Self {
        self.filament = Some((grams, millimeters));
        self
    }

    /// Active tray as reported (usually a string such as `"2"`, or `"255"` when unloaded).
    pub fn tray_now(mut self, value: impl Into<Value>) -> Self {
        self.ams.get_or_insert_with(AmsUnit::default).tray_now = Some(value.into());
        self
    }

    /// Unit-wide humidity reading.
    pub fn ams_humidity(mut self, value: impl Into<Value>) -> Self {
        self.ams.get_or_insert_with(AmsUnit::default).humidity = Some(value.into());
        self
    }

    pub fn tray(mut self, id: u8, remain: f64, state: u32) -> Self {
        self.ams
            .get_or_insert_with(AmsUnit::default)
            .trays
            .push(json!({"id": id.to_string(), "remain": remain, "state": state}));
        self
    }

    pub fn tray_with_humidity(mut self, id: u8, remain: f64, state: u32, humidity: f64) -> Self {
        self.ams
            .get_or_insert_with(AmsUnit::default)
            .trays
            .push(json!({"id": id.to_string(), "remain": remain, "state": state, "humidity": humidity}));
        self
    }

    /// Arbitrary field at a dotted key path from the payload root.
    pub fn set(mut self, path: &str, value: Value) -> Self {
        self.extra.push((path.to_string(), value));
        self
    }

    pub fn build(&self) -> Value {
        let mut body = Map::new();
        let nested = self.firmware != Firmware::Flat;

        if nested {
            body.insert("command".into(), json!("push_status"));
            body.insert("sequence_id".into(), json!(self.sequence_id.to_string()));
        }

        match self.firmware {
            Firmware::Legacy => {
                put(&mut body, "nozzle_temper", self.nozzles[0]);
                put(&mut body, "nozzle_temper_2", self.nozzles[1]);
                put(&mut body, "bed_temper", self.bed);
                put(&mut body, "chamber_temper", self.chamber);
            }
            Firmware::DeviceInfo => {
                let extruders: Vec<Value> = self
                    .nozzles
                    .iter()
                    .enumerate()
                    .filter_map(|(id, t)| t.map(|t| json!({"id": id, "temp": t})))
                    .collect();
                if !extruders.is_empty() {
                    insert_path(&mut body, "device.extruder.info", Value::Array(extruders));
                }
                if let Some(bed) = self.bed {
                    insert_path(&mut body, "device.bed.info.temp", json!(bed));
                }
                if let Some(chamber) = self.chamber {
                    let scaled = (chamber * 100_000.0).round() as i64;
                    insert_path(&mut body, "device.ctc.info.temp", json!(scaled));
                }
            }
            Firmware::Flat => {
                put(&mut body, "nozzle_temper", self.nozzles[0]);
                put(&mut body, "bed_temper", self.bed);
                put(&mut body, "chamber_temper", self.chamber);
            }
        }

        if let Some(progress) = &self.progress {
            body.insert("mc_percent".into(), progress.clone());
        }
        if let Some((current, total)) = self.layers {
            body.insert("layer_num".into(), json!(current));
            body.insert("total_layer_num".into(), json!(total));
        }
        put(&mut body, "gcode_state", self.gcode_state.clone());
        put(&mut body, "subtask_name", self.subtask_name.clone());
        put(&mut body, "gcode_file", self.gcode_file.clone());
        if let Some(code) = &self.print_error {
            body.insert("print_error".into(), code.clone());
        }
        if let Some((grams, mm)) = self.filament {
            body.insert("filament_used_g".into(), json!(grams));
            body.insert("filament_used_mm".into(), json!(mm));
        }
        if let Some(unit) = &self.ams {
            let mut unit_obj = Map::new();
            unit_obj.insert("id".into(), json!("0"));
            put(&mut unit_obj, "tray_now", unit.tray_now.clone());
            put(&mut unit_obj, "humidity", unit.humidity.clone());
            unit_obj.insert("tray".into(), Value::Array(unit.trays.clone()));
            body.insert("ams".into(), json!({"ams": [unit_obj]}));
        }

        let mut root = if nested {
            if let Some(reason) = &self.fail_reason {
                body.insert("fail_reason".into(), json!(reason));
            }
            let mut root = Map::new();
            root.insert("print".into(), Value::Object(body));
            root
        } else {
            if let Some(reason) = &self.fail_reason {
                insert_path(&mut body, "status.error_message", json!(reason));
            }
            body
        };

        for (path, value) in &self.extra {
            insert_path(&mut root, path, value.clone());
        }
        Value::Object(root)
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.build())?)
    }
}

fn put<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

/// Inserts at a dotted key path, replacing non-object intermediates.
fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut keys: Vec<&str> = path.split('.').collect();
    let Some(last) = keys.pop() else {
        return;
    };
    let mut current = root;
    for key in keys {
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}
