//! Alert record types.
//!
//! The [`AlertEvent`] struct represents one record from the alert feed.
//! Only `alertDate` and `data` are interpreted; everything else the feed
//! sends is carried along untouched in [`AlertEvent::extra`] so it still
//! takes part in fingerprinting and reaches the sinks.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

/// Timestamp layout used by the feed for `alertDate` (local time).
pub const ALERT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors raised while interpreting an alert record.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid alertDate '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// One alert published by the feed.
///
/// # Example
///
/// ```json
/// {
///   "alertDate": "2024-04-14 01:42:10",
///   "title": "Rocket and missile fire",
///   "data": "Tel Aviv - City Center",
///   "category": 1
/// }
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AlertEvent {
    /// Local wall-clock time of the alert, kept exactly as received
    #[serde(rename = "alertDate")]
    pub alert_date: String,

    /// Free-form payload, normally the affected location names
    pub data: Value,

    /// Every other field of the record
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AlertEvent {
    /// Create an event with the two required fields
    pub fn new(alert_date: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            alert_date: alert_date.into(),
            data: data.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Attach an additional opaque field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Parse `alertDate` as a naive local timestamp.
    pub fn timestamp(&self) -> Result<NaiveDateTime, EventError> {
        NaiveDateTime::parse_from_str(self.alert_date.trim(), ALERT_DATE_FORMAT).map_err(|source| {
            EventError::InvalidTimestamp {
                value: self.alert_date.clone(),
                source,
            }
        })
    }

    /// The payload as text: the string itself, or the JSON text of any
    /// other value.
    pub fn payload_text(&self) -> Cow<'_, str> {
        match &self.data {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// All top-level fields as a single JSON object.
    pub fn to_object(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert("alertDate".to_string(), Value::String(self.alert_date.clone()));
        map.insert("data".to_string(), self.data.clone());
        map
    }

    /// Top-level fields flattened to string pairs for form and query
    /// encoding. Strings are kept verbatim, other values use their JSON text.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.to_object()
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect()
    }
}
