//! Core value types. Immutable once constructed.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BufferError;

/// A flat parameter value. No nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

/// Event payload. Ordered so serialized blobs are stable.
pub type Parameters = BTreeMap<String, Value>;

/// A named occurrence with a flat set of parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    #[serde(default)]
    parameters: Parameters,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Returns a copy of this event carrying `key = value`, replacing any previous value.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns a copy of this event without `key`.
    pub fn without_param(mut self, key: &str) -> Self {
        self.parameters.remove(key);
        self
    }

    /// Returns a copy of this event under a different name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// Identity of a destination. Used as a map key and for scope filtering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DestinationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An event bound for one destination, stamped with its capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferRecord {
    pub destination: DestinationId,
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}

impl BufferRecord {
    pub fn new(destination: DestinationId, event: Event, timestamp: DateTime<Utc>) -> Self {
        Self {
            destination,
            event,
            timestamp,
        }
    }

    /// Stamp with the current time.
    pub fn now(destination: DestinationId, event: Event) -> Self {
        Self::new(destination, event, Utc::now())
    }

    pub fn event_name(&self) -> &str {
        self.event.name()
    }

    /// NaN and infinite floats have no JSON form; every store refuses them up front.
    pub fn check_storable(&self) -> Result<(), BufferError> {
        let non_finite = self.event.parameters().iter().find(|(_, value)| {
            matches!(value, Value::Float(f) if !f.is_finite())
        });
        match non_finite {
            Some((key, _)) => Err(BufferError::NonFiniteFloat { key: key.clone() }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_param_replaces_existing_value() {
        let event = Event::new("tap")
            .with_param("count", 1)
            .with_param("count", 2);

        assert_eq!(event.param("count"), Some(&Value::Int(2)));
        assert_eq!(event.parameters().len(), 1);
    }

    #[test]
    fn builders_leave_original_untouched() {
        let original = Event::new("tap").with_param("a", "x");
        let renamed = original.clone().renamed("press").without_param("a");

        assert_eq!(original.name(), "tap");
        assert_eq!(original.param("a"), Some(&Value::from("x")));
        assert_eq!(renamed.name(), "press");
        assert!(renamed.parameters().is_empty());
    }

    #[test]
    fn parameters_survive_json() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let event = Event::new("mixed")
            .with_param("s", "text")
            .with_param("i", -7i64)
            .with_param("f", 0.25)
            .with_param("b", true)
            .with_param("d", at);

        let blob = serde_json::to_vec(event.parameters()).unwrap();
        let back: Parameters = serde_json::from_slice(&blob).unwrap();

        assert_eq!(&back, event.parameters());
    }

    #[test]
    fn destination_id_displays_raw_token() {
        let id = DestinationId::from("analytics");
        assert_eq!(id.to_string(), "analytics");
        assert_eq!(id.as_str(), "analytics");
    }

    #[test]
    fn non_finite_floats_are_not_storable() {
        let record = |v: f64| {
            BufferRecord::now(DestinationId::from("a"), Event::new("e").with_param("ratio", v))
        };

        assert!(record(0.5).check_storable().is_ok());
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                record(bad).check_storable(),
                Err(BufferError::NonFiniteFloat { key }) if key == "ratio"
            ));
        }
    }
}
