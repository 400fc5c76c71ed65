//! Wire envelope exchanged with clients in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the sentinel event carrying a human-readable error string.
pub const ERROR_EVENT: &str = "error";

/// A `{name, data}` envelope.
///
/// `name` selects a handler (inbound) or identifies the event type
/// (outbound). `data` is opaque here and decoded by whoever consumes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Logical operation or event name, e.g. `"channel add"`.
    pub name: String,
    /// Handler- or event-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl Message {
    /// Build a message from a name and payload.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Build the `"error"` sentinel with a string payload.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            name: ERROR_EVENT.to_owned(),
            data: Value::String(message.into()),
        }
    }

    /// Whether this is the `"error"` sentinel.
    pub fn is_error(&self) -> bool {
        self.name == ERROR_EVENT
    }

    /// Parse an inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize for an outbound text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
