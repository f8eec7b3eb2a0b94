//! Path expressions into a raw status payload.
//!
//! An expression is a dotted list of keys where any key may carry one or more
//! array indices: `print.ams.ams[0].tray_now`, `print.device.extruder.info[1].temp`.

use crate::error::{NormalizeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<PathSegment>,
    text: String,
}

impl FieldPath {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: &str| NormalizeError::InvalidPath {
            path: expr.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty expression"));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if key.is_empty() && rest.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                if !rest.starts_with('[') {
                    return Err(invalid("unexpected text after index"));
                }
                let close = rest.find(']').ok_or_else(|| invalid("unclosed index bracket"))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index is not a non-negative integer"))?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
            }
        }

        Ok(Self {
            segments,
            text: trimmed.to_string(),
        })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Walks the tree; any missing key, wrong node type or out-of-range index yields `None`.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |node, segment| match segment {
            PathSegment::Key(key) => node.get(key.as_str()),
            PathSegment::Index(index) => node.get(*index),
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for FieldPath {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = NormalizeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.text
    }
}

/// Numbers and numeric strings (firmware sends both, e.g. `"tray_now": "2"`).
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Strings verbatim (trimmed), numbers rendered as text. Empty strings are absent.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keys_and_indices() {
        let path = FieldPath::parse("print.ams.ams[0].tray_now").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("print".into()),
                PathSegment::Key("ams".into()),
                PathSegment::Key("ams".into()),
                PathSegment::Index(0),
                PathSegment::Key("tray_now".into()),
            ]
        );
        assert_eq!(path.to_string(), "print.ams.ams[0].tray_now");

        let nested = FieldPath::parse("[1][0].x").unwrap();
        assert_eq!(
            nested.segments(),
            &[PathSegment::Index(1), PathSegment::Index(0), PathSegment::Key("x".into())]
        );
    }

    #[test]
    fn test_parse_rejects_bad_expressions() {
        for bad in ["", "  ", "print..ams", "ams[", "ams[x]", "ams[-1]", "ams[0]tail"] {
            assert!(
                matches!(FieldPath::parse(bad), Err(NormalizeError::InvalidPath { .. })),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_lookup_never_panics_on_shape_mismatch() {
        let payload = json!({"print": {"ams": {"ams": [{"tray_now": "2"}]}, "bed_temper": 60}});

        let hit = FieldPath::parse("print.ams.ams[0].tray_now").unwrap();
        assert_eq!(hit.lookup(&payload), Some(&json!("2")));

        for miss in ["print.ams.ams[3].tray_now", "print.bed_temper[0]", "print.bed_temper.x", "nope"] {
            assert_eq!(FieldPath::parse(miss).unwrap().lookup(&payload), None, "{miss}");
        }
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(as_number(&json!(45)), Some(45.0));
        assert_eq!(as_number(&json!(" 2 ")), Some(2.0));
        assert_eq!(as_number(&json!(0)), Some(0.0));
        assert_eq!(as_number(&json!("NaN")), None);
        assert_eq!(as_number(&json!(true)), None);
        assert_eq!(as_number(&json!("abc")), None);
    }

    #[test]
    fn test_text_coercion() {
        assert_eq!(as_text(&json!("FINISH")), Some("FINISH".into()));
        assert_eq!(as_text(&json!(50348044)), Some("50348044".into()));
        assert_eq!(as_text(&json!("   ")), None);
        assert_eq!(as_text(&json!(null)), None);
    }

    #[test]
    fn test_serde_as_string() {
        let path: FieldPath = serde_json::from_value(json!("print.mc_percent")).unwrap();
        assert_eq!(path.as_str(), "print.mc_percent");
        assert_eq!(serde_json::to_value(&path).unwrap(), json!("print.mc_percent"));
        assert!(serde_json::from_value::<FieldPath>(json!("a[")).is_err());
    }
}
