//! Identity types for piheat-sync.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SyncError;

/// Number of random bytes in a freshly generated [`CommandId`].
const COMMAND_ID_BYTES: usize = 30;

/// The relay feed shared by a device and its clients.
///
/// Opaque to the protocol. It ends up in relay URLs, so it must be
/// non-empty and free of whitespace and `/`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a ChannelId, rejecting values that cannot name a relay feed.
    pub fn new(id: impl Into<String>) -> Result<Self, SyncError> {
        let id = id.into();
        if id.is_empty() {
            return Err(SyncError::InvalidData("channel id must not be empty".into()));
        }
        if id.chars().any(|c| c == '/' || c.is_whitespace()) {
            return Err(SyncError::InvalidData(format!(
                "channel id contains invalid characters: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

/// Identifier of a command, echoed back by the device as `lastcmd_id`
/// once the command has been applied.
///
/// Fresh ids are 30 random bytes, standard base64.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Generate a new random CommandId.
    pub fn random() -> Result<Self, SyncError> {
        let mut bytes = [0u8; COMMAND_ID_BYTES];
        getrandom::getrandom(&mut bytes).map_err(|e| SyncError::Random(e.to_string()))?;
        Ok(Self(STANDARD.encode(bytes)))
    }

    /// Get the id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CommandId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_accepts_plain_names() {
        let id = ChannelId::new("device-42").unwrap();
        assert_eq!(id.as_str(), "device-42");
        assert_eq!(id.to_string(), "device-42");
    }

    #[test]
    fn channel_id_rejects_empty_and_path_characters() {
        assert!(ChannelId::new("").is_err());
        assert!(ChannelId::new("a/b").is_err());
        assert!(ChannelId::new("two words").is_err());
    }

    #[test]
    fn channel_id_deserialize_validates() {
        let ok: ChannelId = serde_json::from_str("\"device-42\"").unwrap();
        assert_eq!(ok.as_str(), "device-42");
        assert!(serde_json::from_str::<ChannelId>("\"\"").is_err());
    }

    #[test]
    fn command_id_is_40_base64_chars() {
        let id = CommandId::random().unwrap();
        // 30 bytes = 40 base64 chars, no padding needed
        assert_eq!(id.as_str().len(), 40);
        assert_eq!(STANDARD.decode(id.as_str()).unwrap().len(), COMMAND_ID_BYTES);
    }

    #[test]
    fn command_ids_are_unique() {
        let a = CommandId::random().unwrap();
        let b = CommandId::random().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn command_id_serializes_as_plain_string() {
        let id = CommandId::from("cmd-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cmd-1\"");
    }
}
