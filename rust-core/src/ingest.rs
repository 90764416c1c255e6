//! Ingestion boundary: vendor and transport payloads to canonical samples.
//!
//! Vendor payload shapes vary by firmware generation and transport. This
//! module is the only place that looks at them; everything past it sees the
//! canonical [`Sample`], [`FacialEvent`] and [`EogReading`] types.
//!
//! Supported forms:
//!
//! | Source | Shape | Parser |
//! |--------|-------|--------|
//! | Headset facial stream | `{"eyeAct","uAct","uPow","lAct","lPow"}` or `[eyeAct, uAct, uPow, lAct, lPow]` | [`FacialEvent::from_vendor`] |
//! | Headset streams | `{"time": t, "pow"/"mot"/"dev"/"fac": ...}` | [`sample_from_stream`] |
//! | UDP EOG | `{"t": <secs>, "eog": <value>}` | [`EogReading::from_datagram`] |
//! | Serial EOG | `"<t>,<value>"` | [`EogReading::from_csv_line`] |
//!
//! Malformed numbers become zero; a payload that cannot be interpreted at
//! all yields `None`.

use serde_json::Value;
use tracing::debug;

use crate::types::{FacialEvent, Sample, SamplePayload};

// ============================================================================
// NUMERIC HELPERS
// ============================================================================

/// Reads a JSON number or numeric string; anything else is `None`.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

/// Reads a power value, defaulting to zero.
fn power_or_zero(value: Option<&Value>) -> f64 {
    value.and_then(as_f64).unwrap_or(0.0)
}

/// Reads a numeric array, mapping non-numeric entries to zero.
///
/// Anything other than an array yields an empty vector.
pub fn power_vector_from_json(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().map(|v| as_f64(v).unwrap_or(0.0)).collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// FACIAL EVENTS
// ============================================================================

/// Positions in the array form of a facial event.
const FAC_EYE_ACT: usize = 0;
const FAC_UPPER_POW: usize = 2;
const FAC_LOWER_POW: usize = 4;

impl FacialEvent {
    /// Normalizes a vendor facial payload (object or positional array).
    ///
    /// Returns `None` for anything that is neither.
    pub fn from_vendor(value: &Value) -> Option<Self> {
        let (action, upper, lower) = match value {
            Value::Object(map) => (map.get("eyeAct"), map.get("uPow"), map.get("lPow")),
            Value::Array(items) => (
                items.get(FAC_EYE_ACT),
                items.get(FAC_UPPER_POW),
                items.get(FAC_LOWER_POW),
            ),
            _ => return None,
        };
        let label = action.and_then(Value::as_str);
        Some(FacialEvent::from_label(
            label,
            power_or_zero(upper),
            power_or_zero(lower),
        ))
    }
}

// ============================================================================
// HEADSET STREAMS
// ============================================================================

/// Converts one headset stream record into a canonical sample.
///
/// `stream` is the stream name (`pow`, `mot`, `dev`, `fac`). The record's
/// `time` field is used when present, otherwise `fallback_t`. Unknown
/// streams and records without the stream's payload yield `None`.
pub fn sample_from_stream(stream: &str, record: &Value, fallback_t: f64) -> Option<Sample> {
    let t = record.get("time").and_then(as_f64).unwrap_or(fallback_t);
    let payload = match stream {
        "pow" => SamplePayload::Power {
            values: power_vector_from_json(record.get("pow")?),
        },
        "mot" => SamplePayload::Motion {
            values: power_vector_from_json(record.get("mot")?),
        },
        "dev" => SamplePayload::Quality {
            value: record.get("signal").and_then(as_f64).unwrap_or(1.0),
        },
        "fac" => SamplePayload::Facial(FacialEvent::from_vendor(record.get("fac").unwrap_or(record))?),
        other => {
            debug!(stream = other, "unknown headset stream ignored");
            return None;
        }
    };
    Some(Sample::new(t, payload))
}

// ============================================================================
// EXTERNAL EOG
// ============================================================================

/// One external EOG reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EogReading {
    pub t: f64,
    pub value: f64,
}

impl EogReading {
    /// Parses a UDP JSON datagram `{"t": <secs>, "eog": <value>}`.
    ///
    /// A missing `t` falls back to `fallback_t`; a missing `eog` reads as 0.
    /// Returns `None` when the bytes are not a JSON object.
    pub fn from_datagram(bytes: &[u8], fallback_t: f64) -> Option<Self> {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(err) => {
                debug!(error = %err, "undecodable EOG datagram dropped");
                return None;
            }
        };
        let obj = value.as_object()?;
        Some(Self {
            t: obj.get("t").and_then(as_f64).unwrap_or(fallback_t),
            value: obj.get("eog").and_then(as_f64).unwrap_or(0.0),
        })
    }

    /// Parses one serial line `"<t>,<value>"`.
    pub fn from_csv_line(line: &str) -> Option<Self> {
        let (t, value) = line.trim().split_once(',')?;
        let t = t.trim().parse::<f64>().ok().filter(|x| x.is_finite())?;
        let value = value.trim().parse::<f64>().ok().filter(|x| x.is_finite())?;
        Some(Self { t, value })
    }

    /// Canonical sample carrying this reading and an optional source rate.
    pub fn into_sample(self, source_rate_hz: Option<f64>) -> Sample {
        Sample::new(
            self.t,
            SamplePayload::Eog {
                value: self.value,
                source_rate_hz,
            },
        )
    }
}
