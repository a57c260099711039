//! What travels through the relay.
//!
//! The relay stores opaque JSON content per channel and returns it newest
//! first, stamped with its own arrival time. In encrypted mode the content is
//! an [`Envelope`]; in legacy mode it is a cleartext message object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// Encrypted message as stored on the relay.
///
/// Both fields are standard base64. `nonce` is the 16-byte AES-CBC IV and
/// doubles as the replay key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 IV.
    pub nonce: String,
    /// Base64 ciphertext.
    pub payload: String,
}

impl Envelope {
    /// Read an envelope out of relay content.
    pub fn from_content(content: &Value) -> Result<Self, SyncError> {
        let field = |name: &str| -> Result<String, SyncError> {
            content
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SyncError::InvalidData(format!("envelope has no {name}")))
        };
        Ok(Self {
            nonce: field("nonce")?,
            payload: field("payload")?,
        })
    }

    /// Relay content for this envelope.
    pub fn to_content(&self) -> Value {
        serde_json::json!({
            "nonce": self.nonce,
            "payload": self.payload,
        })
    }
}

/// Which protocol generation a session speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireMode {
    /// Encrypted envelopes.
    #[default]
    Encrypted,
    /// Cleartext messages of first-generation devices.
    LegacyCleartext,
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireMode::Encrypted => f.write_str("encrypted"),
            WireMode::LegacyCleartext => f.write_str("legacy-cleartext"),
        }
    }
}

impl FromStr for WireMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encrypted" => Ok(WireMode::Encrypted),
            "legacy-cleartext" | "legacy" => Ok(WireMode::LegacyCleartext),
            other => Err(SyncError::InvalidData(format!("unknown wire mode: {other}"))),
        }
    }
}

/// One entry of a channel feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayItem {
    /// When the relay accepted the item (relay clock).
    #[serde(rename = "created", alias = "arrival_time")]
    pub arrival_time: DateTime<Utc>,
    /// Opaque content as published.
    pub content: Value,
}

impl RelayItem {
    /// Create a relay item.
    pub fn new(arrival_time: DateTime<Utc>, content: Value) -> Self {
        Self {
            arrival_time,
            content,
        }
    }

    /// The envelope nonce, if the content carries one.
    pub fn nonce(&self) -> Option<&str> {
        self.content.get("nonce").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_from_content() {
        let content = json!({"nonce": "AAAA", "payload": "BBBB"});
        let env = Envelope::from_content(&content).unwrap();
        assert_eq!(env.nonce, "AAAA");
        assert_eq!(env.payload, "BBBB");
        assert_eq!(env.to_content(), content);
    }

    #[test]
    fn envelope_missing_field() {
        let err = Envelope::from_content(&json!({"nonce": "AAAA"})).unwrap_err();
        assert!(err.to_string().contains("payload"));
        assert!(Envelope::from_content(&json!({"nonce": 1, "payload": "x"})).is_err());
    }

    #[test]
    fn wire_mode_parse_and_default() {
        assert_eq!(WireMode::default(), WireMode::Encrypted);
        assert_eq!("legacy-cleartext".parse::<WireMode>().unwrap(), WireMode::LegacyCleartext);
        assert_eq!(WireMode::LegacyCleartext.to_string(), "legacy-cleartext");
        assert!("rot13".parse::<WireMode>().is_err());
    }

    #[test]
    fn relay_item_reads_dweet_shape() {
        let item: RelayItem = serde_json::from_value(json!({
            "thing": "device-42",
            "created": "2024-01-01T12:00:00.123Z",
            "content": {"nonce": "n1", "payload": "p1"}
        }))
        .unwrap();
        assert_eq!(item.nonce(), Some("n1"));
        assert_eq!(
            item.arrival_time,
            "2024-01-01T12:00:00.123Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn relay_item_without_nonce() {
        let item = RelayItem::new(Utc::now(), json!({"type": "status"}));
        assert_eq!(item.nonce(), None);
    }
}
