use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved field carrying the record timestamp (Unix epoch milliseconds).
pub const TIMESTAMP_FIELD: &str = "solaredge_mqtt_timestamp";

/// Raw field mapping as returned by a device read.
pub type Reading = BTreeMap<String, FieldValue>;

/// A single telemetry record produced by one successful poll cycle.
///
/// Serializes as a flat object of its fields, timestamp included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord {
    fields: Reading,
}

impl TelemetryRecord {
    /// Create a record from a reading, stamping it with `timestamp_ms`.
    ///
    /// Any timestamp field already present in the reading is overwritten.
    pub fn new(mut fields: Reading, timestamp_ms: i64) -> Self {
        fields.insert(TIMESTAMP_FIELD.to_string(), FieldValue::Integer(timestamp_ms));
        Self { fields }
    }

    /// Timestamp of this record in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> Option<i64> {
        match self.fields.get(TIMESTAMP_FIELD) {
            Some(FieldValue::Integer(ts)) => Some(*ts),
            _ => None,
        }
    }

    /// Look up a single field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All fields, timestamp included.
    pub fn fields(&self) -> &Reading {
        &self.fields
    }

    /// Number of fields, timestamp included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Typed field value.
///
/// Register values are numeric; identification blocks (manufacturer,
/// model, serial number) are reported as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer value (raw register content, scale factors).
    Integer(i64),

    /// Floating point value (scaled readings).
    Float(f64),

    /// Text value.
    Text(String),
}

impl FieldValue {
    /// Numeric view of this value, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    /// Integer view of this value.
    ///
    /// Floats only convert when they carry no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Integer(v.into())
    }
}

impl From<i16> for FieldValue {
    fn from(v: i16) -> Self {
        FieldValue::Integer(v.into())
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Integer(v.into())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}
