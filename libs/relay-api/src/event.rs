use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::util::resolve_path;

/// Producer-issued domain event. Immutable once accepted.
///
/// Bus-style envelopes are accepted too: `detail-type` for the type tag and
/// `detail` for the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id assigned by the producer.
    pub id: String,
    /// Declared event type (e.g. "PersonCreated").
    #[serde(rename = "type", alias = "detail-type")]
    pub event_type: String,
    /// Producer name (e.g. "de.example.person").
    #[serde(default)]
    pub source: String,
    /// Creation time, Unix milliseconds.
    #[serde(default)]
    pub ts_ms: i64,
    /// Opaque payload; the pipe only reads the correlation id out of it.
    #[serde(default, alias = "detail")]
    pub payload: serde_json::Value,
}

impl Event {
    /// Extract the correlation id at `path` (dot notation) from the payload.
    ///
    /// Strings are taken as-is, numbers are rendered. Anything else is a
    /// malformed event.
    pub fn correlation_id(&self, path: &str) -> Result<String, RelayError> {
        match resolve_path(&self.payload, path) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(serde_json::Value::String(_)) => Err(RelayError::permanent(format!(
                "event '{}': correlation field '{path}' is empty",
                self.id
            ))),
            Some(other) => Err(RelayError::permanent(format!(
                "event '{}': correlation field '{path}' is not a string: {other}",
                self.id
            ))),
            None => Err(RelayError::permanent(format!(
                "event '{}': correlation field '{path}' missing",
                self.id
            ))),
        }
    }
}
