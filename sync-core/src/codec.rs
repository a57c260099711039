//! Relay content <-> messages, per protocol generation.
//!
//! Encrypted mode carries `{nonce, payload}` envelopes. Legacy mode carries
//! cleartext objects from first-generation devices, which lack timestamps,
//! schedules and command ids; [`Codec::frame`] fills those in so both modes
//! share one validation path.

use serde_json::{json, Value};
use sync_types::{Envelope, Message, RawMessage, RelayItem, WireMode};
use thiserror::Error;

use crate::cipher::{Cipher, CipherError};

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Relay content is not a usable envelope or object.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Encryption or decryption failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The message cannot be expressed in legacy cleartext.
    #[error("not supported in legacy mode: {0}")]
    LegacyUnsupported(&'static str),

    /// JSON (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Relay content after framing, before opening.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An encrypted envelope.
    Sealed(Envelope),
    /// A cleartext object.
    Clear(RawMessage),
}

/// Reads and writes relay content for one session.
#[derive(Debug, Clone)]
pub enum Codec {
    /// Encrypted envelopes under the channel key.
    Encrypted(Cipher),
    /// Cleartext messages.
    LegacyCleartext,
}

impl Codec {
    /// Build the codec for `mode`.
    pub fn for_mode(mode: WireMode, passphrase: &str) -> Self {
        match mode {
            WireMode::Encrypted => Codec::Encrypted(Cipher::from_passphrase(passphrase)),
            WireMode::LegacyCleartext => Codec::LegacyCleartext,
        }
    }

    /// The wire mode this codec speaks.
    pub fn mode(&self) -> WireMode {
        match self {
            Codec::Encrypted(_) => WireMode::Encrypted,
            Codec::LegacyCleartext => WireMode::LegacyCleartext,
        }
    }

    /// Extract the frame carried by a relay item.
    pub fn frame(&self, item: &RelayItem) -> Result<Frame, CodecError> {
        match self {
            Codec::Encrypted(_) => Envelope::from_content(&item.content)
                .map(Frame::Sealed)
                .map_err(|e| CodecError::MalformedEnvelope(e.to_string())),
            Codec::LegacyCleartext => {
                let mut raw = RawMessage::from_value(item.content.clone()).ok_or_else(|| {
                    CodecError::MalformedEnvelope("content is not an object".into())
                })?;
                let arrival = item
                    .arrival_time
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                raw.insert_default("timestamp", Value::String(arrival.clone()));
                match raw.get("type").and_then(Value::as_str) {
                    Some("status") => {
                        raw.insert_default("program", json!([]));
                        raw.insert_default("name", json!(""));
                    }
                    Some("command") => {
                        raw.insert_default("id", Value::String(format!("legacy-{arrival}")));
                    }
                    _ => {}
                }
                Ok(Frame::Clear(raw))
            }
        }
    }

    /// Turn a frame into an unvalidated message.
    pub fn open(&self, frame: Frame) -> Result<RawMessage, CodecError> {
        match (self, frame) {
            (Codec::Encrypted(cipher), Frame::Sealed(envelope)) => Ok(cipher.decrypt(&envelope)?),
            (_, Frame::Clear(raw)) => Ok(raw),
            (Codec::LegacyCleartext, Frame::Sealed(_)) => Err(CodecError::MalformedEnvelope(
                "encrypted envelope in legacy mode".into(),
            )),
        }
    }

    /// Produce relay content for a message.
    pub fn seal(&self, message: &Message) -> Result<Value, CodecError> {
        match self {
            Codec::Encrypted(cipher) => Ok(cipher.encrypt(message)?.to_content()),
            Codec::LegacyCleartext => match message {
                Message::Command(cmd) => {
                    let command = cmd
                        .legacy_command
                        .ok_or(CodecError::LegacyUnsupported("schedule and override commands"))?;
                    Ok(json!({ "type": "command", "command": command }))
                }
                Message::Status(_) => Ok(serde_json::to_value(message)?),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use sync_types::{CommandId, CommandMessage, LegacyCommand, Override};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn command(legacy: Option<LegacyCommand>) -> Message {
        Message::Command(CommandMessage {
            timestamp: at("2024-01-01T00:00:00Z"),
            id: CommandId::from("cmd-1"),
            schedule: None,
            override_program: Some(Override::permanent(false)),
            legacy_command: legacy,
        })
    }

    #[test]
    fn encrypted_seal_frame_open() {
        let codec = Codec::for_mode(WireMode::Encrypted, "hunter2");
        let content = codec.seal(&command(None)).unwrap();
        assert!(content.get("nonce").is_some());
        assert!(content.get("type").is_none());

        let item = RelayItem::new(at("2024-01-01T00:00:01Z"), content);
        let frame = codec.frame(&item).unwrap();
        let msg = codec.open(frame).unwrap().into_message().unwrap();
        assert_eq!(msg, command(None));
    }

    #[test]
    fn encrypted_frame_rejects_cleartext() {
        let codec = Codec::for_mode(WireMode::Encrypted, "hunter2");
        let item = RelayItem::new(Utc::now(), json!({"type": "status", "status": "on"}));
        assert!(matches!(
            codec.frame(&item),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn legacy_status_is_upgraded() {
        let codec = Codec::for_mode(WireMode::LegacyCleartext, "");
        let item = RelayItem::new(
            at("2024-01-01T08:00:00Z"),
            json!({"type": "status", "status": "on", "msgexp_s": 60, "msgupd_s": 10, "name": "boiler"}),
        );
        let raw = codec.open(codec.frame(&item).unwrap()).unwrap();
        assert_eq!(raw.timestamp(), Some(item.arrival_time));

        let msg = raw.into_message().unwrap();
        let status = msg.as_status().unwrap();
        assert!(status.status);
        assert!(status.schedule.is_empty());
        assert_eq!(status.expiry_s, Some(60));
    }

    #[test]
    fn legacy_command_gets_an_id() {
        let codec = Codec::for_mode(WireMode::LegacyCleartext, "");
        let item = RelayItem::new(
            at("2024-01-01T08:00:00Z"),
            json!({"type": "command", "command": "turnoff"}),
        );
        let msg = codec
            .open(codec.frame(&item).unwrap())
            .unwrap()
            .into_message()
            .unwrap();
        let cmd = msg.as_command().unwrap();
        assert_eq!(cmd.legacy_command, Some(LegacyCommand::TurnOff));
        assert!(cmd.id.as_str().starts_with("legacy-"));
    }

    #[test]
    fn legacy_seal_only_one_word_commands() {
        let codec = Codec::for_mode(WireMode::LegacyCleartext, "");
        assert_eq!(
            codec.seal(&command(Some(LegacyCommand::TurnOn))).unwrap(),
            json!({"type": "command", "command": "turnon"})
        );
        assert!(matches!(
            codec.seal(&command(None)),
            Err(CodecError::LegacyUnsupported(_))
        ));
    }

    #[test]
    fn legacy_open_rejects_envelopes() {
        let codec = Codec::LegacyCleartext;
        let frame = Frame::Sealed(Envelope {
            nonce: "AA==".into(),
            payload: "AA==".into(),
        });
        assert!(codec.open(frame).is_err());
    }
}
