//! Record entities persisted by the store.
//!
//! The gateway core never looks at business fields; handlers decode inbound
//! payloads into these types and hand the serialized form to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding [`Channel`] records.
pub const CHANNEL_COLLECTION: &str = "channel";
/// Collection holding [`User`] records.
pub const USER_COLLECTION: &str = "user";
/// Collection holding [`ChannelMessage`] records.
pub const MESSAGE_COLLECTION: &str = "message";

/// A chat channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Store-generated id; absent before insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
}

/// A connected user. One record exists per live session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Store-generated id; absent before insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
}

/// A message posted to a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    /// Store-generated id; absent before insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel this message belongs to.
    pub channel_id: String,
    /// Message text.
    pub body: String,
    /// Display name of the author at posting time. Stamped by the server.
    #[serde(default)]
    pub author: String,
    /// Posting time. Stamped by the server.
    #[serde(default = "Utc::now", with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
}

/// RFC 3339 with a fixed millisecond fraction, so that timestamps sort
/// correctly as plain strings.
mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(d)
    }
}
