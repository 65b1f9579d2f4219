//! Snapshot and result records exchanged over the broker.
//!
//! Both records are ordered JSON objects. A [`SnapshotRecord`] is what a
//! sensor capture looks like on the inbound exchange; a [`ResultRecord`] is
//! what a transform publishes back. The pair `(user_id, datetime)` is the
//! [`CorrelationKey`] that ties the two together.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::transform_registry::TransformError;

/// Field carrying the user identifier on every record.
pub const USER_ID: &str = "user_id";

/// Field carrying the capture timestamp on every record.
pub const DATETIME: &str = "datetime";

/// The `(user_id, datetime)` pair identifying one sensor capture.
///
/// Values are echoed verbatim: a numeric `datetime` stays numeric in the
/// result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub user_id: Value,
    pub datetime: Value,
}

impl CorrelationKey {
    /// Textual form of the user id, without JSON quoting.
    pub fn user_id_text(&self) -> String {
        value_text(&self.user_id)
    }

    /// Textual form of the capture timestamp, without JSON quoting.
    pub fn datetime_text(&self) -> String {
        value_text(&self.datetime)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {}, snapshot {}", self.user_id_text(), self.datetime_text())
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One sensor capture as received from the inbound exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRecord {
    fields: IndexMap<String, Value>,
}

impl SnapshotRecord {
    pub fn new(fields: IndexMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Decode a record from a JSON object body.
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Correlation key, if both parts are present.
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        Some(CorrelationKey {
            user_id: self.fields.get(USER_ID)?.clone(),
            datetime: self.fields.get(DATETIME)?.clone(),
        })
    }

    /// Correlation key, rejecting the record when either part is missing.
    pub fn require_key(&self) -> Result<CorrelationKey, TransformError> {
        Ok(CorrelationKey {
            user_id: self.require(USER_ID)?.clone(),
            datetime: self.require(DATETIME)?.clone(),
        })
    }

    /// Any value present under `field`.
    pub fn require(&self, field: &str) -> Result<&Value, TransformError> {
        self.fields
            .get(field)
            .ok_or_else(|| TransformError::MissingField { field: field.to_string() })
    }

    /// A numeric value, kept in its original JSON representation.
    pub fn require_number(&self, field: &str) -> Result<Number, TransformError> {
        match self.require(field)? {
            Value::Number(n) => Ok(n.clone()),
            other => Err(invalid(field, "a number", other)),
        }
    }

    pub fn require_str(&self, field: &str) -> Result<&str, TransformError> {
        match self.require(field)? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(invalid(field, "a string", other)),
        }
    }

    /// A non-negative integer that fits in `u32` (image dimensions).
    pub fn require_u32(&self, field: &str) -> Result<u32, TransformError> {
        let value = self.require(field)?;
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid(field, "a non-negative integer", value))
    }
}

fn invalid(field: &str, expected: &str, found: &Value) -> TransformError {
    TransformError::InvalidField {
        field: field.to_string(),
        reason: format!("expected {}, found {}", expected, found),
    }
}

/// Output of a transform: the correlation key followed by transform fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord {
    fields: IndexMap<String, Value>,
}

impl ResultRecord {
    /// Start a record that echoes `key` as its first two fields.
    pub fn new(key: &CorrelationKey) -> Self {
        let mut fields = IndexMap::new();
        fields.insert(USER_ID.to_string(), key.user_id.clone());
        fields.insert(DATETIME.to_string(), key.datetime.clone());
        Self { fields }
    }

    /// Build a record from a typed result struct.
    ///
    /// The struct must serialize to a JSON object; field order follows the
    /// struct declaration.
    pub fn from_serialize<T: Serialize>(result: &T) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(result)?)
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        Some(CorrelationKey {
            user_id: self.fields.get(USER_ID)?.clone(),
            datetime: self.fields.get(DATETIME)?.clone(),
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
