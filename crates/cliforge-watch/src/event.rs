use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One event from a progress stream, whatever the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub data: String,
    #[serde(default)]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// The wire form, kept for debugging
    #[serde(default)]
    pub raw: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            id: None,
            timestamp: Utc::now(),
            raw: None,
        }
    }

    /// The `event` binding exit-condition expressions evaluate against
    pub fn scope(&self) -> Value {
        json!({
            "type": self.event_type,
            "data": self.data,
            "id": self.id,
        })
    }

    /// Parse the payload as JSON when possible
    pub fn parsed_data(&self) -> Value {
        serde_json::from_str(&self.data).unwrap_or_else(|_| Value::String(self.data.clone()))
    }
}
