//! Field resolver: first plausible value among ordered candidate paths.
//!
//! Resolution is a pure function of the payload and the candidate list. It
//! never substitutes a default: a zero reading is a value, a missing field is
//! `None`.

use crate::path::{as_number, as_text, FieldPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Scaled-integer encoding used by some firmware for temperature-like fields.
///
/// Raw values strictly above `above` are divided by `divisor`; anything else
/// passes through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaledEncoding {
    pub above: f64,
    pub divisor: f64,
}

impl ScaledEncoding {
    pub const CHAMBER: Self = Self {
        above: 100.0,
        divisor: 100_000.0,
    };

    pub fn decode(&self, raw: f64) -> f64 {
        if raw > self.above && self.divisor != 0.0 {
            raw / self.divisor
        } else {
            raw
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plausibility {
    /// Numeric value within an inclusive range (checked after decoding).
    Range { min: f64, max: f64 },
    /// Any non-empty text; numbers are rendered as text.
    Text,
}

impl Plausibility {
    pub const fn range(min: f64, max: f64) -> Self {
        Self::Range { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

/// A resolved value and the candidate that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: FieldValue,
    pub candidate: usize,
    pub path: String,
}

/// Tries `(scope, path)` pairs in order and returns the first plausible value.
pub fn resolve_candidates<'a, I>(
    candidates: I,
    check: &Plausibility,
    scale: Option<ScaledEncoding>,
) -> Option<Resolved>
where
    I: IntoIterator<Item = (&'a Value, &'a FieldPath)>,
{
    for (candidate, (scope, path)) in candidates.into_iter().enumerate() {
        let Some(raw) = path.lookup(scope) else {
            continue;
        };
        let value = match check {
            Plausibility::Range { min, max } => {
                let Some(n) = as_number(raw) else {
                    trace!(path = %path, "candidate is not numeric");
                    continue;
                };
                let n = scale.map_or(n, |s| s.decode(n));
                if n < *min || n > *max {
                    trace!(path = %path, value = n, "candidate outside plausible range");
                    continue;
                }
                FieldValue::Number(n)
            }
            Plausibility::Text => match as_text(raw) {
                Some(text) => FieldValue::Text(text),
                None => continue,
            },
        };
        return Some(Resolved {
            value,
            candidate,
            path: path.to_string(),
        });
    }
    None
}

/// Resolves candidates that are all rooted at the payload.
pub fn resolve(
    payload: &Value,
    paths: &[FieldPath],
    check: &Plausibility,
    scale: Option<ScaledEncoding>,
) -> Option<Resolved> {
    resolve_candidates(paths.iter().map(|p| (payload, p)), check, scale)
}
