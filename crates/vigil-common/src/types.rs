use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operation types every storage engine accepts by default.
pub const OP_TYPES: &[&str] = &[
    "ping",
    "httping",
    "traceroute",
    "dns",
    "dash",
    "throughput",
    "wifi",
    "upload",
    "status",
    "operator",
];

/// Reserved series holding node-level user attributes. Not a valid
/// `write_op` type.
pub const USER_SERIES: &str = "user";

/// Field names injected into every operation record before persistence.
pub const VERSION_FIELD: &str = "version";
pub const SIGN_FIELD: &str = "sign";

/// A scalar stored in a record field.
///
/// Serialized untagged so that records render as plain JSON scalars.
///
/// # Examples
///
/// ```
/// use vigil_common::types::FieldValue;
///
/// let v: FieldValue = serde_json::from_str("42").unwrap();
/// assert_eq!(v, FieldValue::Int(42));
/// assert_eq!(v.as_i64(), Some(42));
/// assert_eq!(FieldValue::from("eth0").to_string(), "eth0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Integer view of the value. Floats are truncated, text is parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Float(f) if f.is_finite() => Some(*f as i64),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a JSON scalar into a field value. Arrays, objects and null
    /// have no field representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float)),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// Field map of a record. Sorted so that any rendering is canonical.
pub type Fields = BTreeMap<String, FieldValue>;

/// A named, typed event about to be persisted (a measurement or an operator
/// action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op_type: String,
    pub fields: Fields,
}

impl OperationRecord {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// A record read back from a storage engine, with the engine's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub op_type: String,
    /// Milliseconds since the Unix epoch, UTC.
    pub timestamp_ms: i64,
    pub fields: Fields,
}

/// One measurement-task specification from a schedule file or the
/// controller. The document is kept as-is; only `taskname` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleEntry(pub serde_json::Value);

impl ScheduleEntry {
    pub fn taskname(&self) -> Option<&str> {
        self.0.get("taskname").and_then(|v| v.as_str())
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}
