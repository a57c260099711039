//! Per-item acceptance checks for a fetched relay batch.
//!
//! Items arrive newest first. Each item is checked in this order and stops at
//! the first failure:
//!
//! 1. expiry (the first expired item ends the batch; everything older is older still)
//! 2. envelope framing
//! 3. nonce replay against older items of the same batch
//! 4. decryption
//! 5. declared timestamp against relay arrival time
//! 6. message shape
//!
//! Per-item failures never abort the batch.

use chrono::{DateTime, Utc};
use sync_types::{Message, RelayItem};
use thiserror::Error;

use crate::cipher::CipherError;
use crate::codec::{Codec, CodecError};

/// Default allowed difference between relay arrival time and declared timestamp.
pub const DEFAULT_TOLERANCE_MS: u64 = 30_000;

/// Why an item was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Older than the message expiry.
    #[error("message expired")]
    TooOld,

    /// An older item of the batch carries the same nonce.
    #[error("duplicate nonce")]
    DuplicateNonce,

    /// Relay content is not a usable envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Ciphertext is unreadable, possibly a wrong passphrase.
    #[error("decryption failed, check passphrase")]
    DecryptFailure,

    /// Declared timestamp missing or too far from arrival time.
    #[error("timestamp mismatch (offset {offset_ms:?} ms)")]
    ClockSkew {
        /// Arrival minus declared timestamp, if a timestamp was present.
        offset_ms: Option<i64>,
    },

    /// Required fields missing or of the wrong type.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// Outcome for one relay item.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The item is a fresh, authentic, well-formed message.
    Accepted(Message),
    /// The item was dropped.
    Rejected(Rejection),
}

impl Verdict {
    /// The accepted message, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Verdict::Accepted(msg) => Some(msg),
            Verdict::Rejected(_) => None,
        }
    }
}

/// Inputs that are constant across one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationParams {
    /// Current time (client clock).
    pub now: DateTime<Utc>,
    /// Items at least this old are expired.
    pub msg_expiry_s: u64,
    /// Maximum |arrival - timestamp|.
    pub tolerance_ms: u64,
}

/// Verdicts for the evaluated prefix of a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    /// One verdict per evaluated item, in batch order. Ends with the
    /// `TooOld` verdict when the batch was cut short.
    pub verdicts: Vec<Verdict>,
    /// Index of the first expired item, if any.
    pub expired_from: Option<usize>,
}

impl BatchOutcome {
    /// Accepted messages, newest first.
    pub fn accepted(&self) -> impl Iterator<Item = &Message> {
        self.verdicts.iter().filter_map(Verdict::message)
    }

    /// Rejections, in batch order.
    pub fn rejections(&self) -> impl Iterator<Item = &Rejection> {
        self.verdicts.iter().filter_map(|v| match v {
            Verdict::Rejected(r) => Some(r),
            Verdict::Accepted(_) => None,
        })
    }

    /// True if any item failed to decrypt.
    pub fn password_error(&self) -> bool {
        self.rejections().any(|r| *r == Rejection::DecryptFailure)
    }
}

/// Validate a newest-first batch.
pub fn validate_batch(codec: &Codec, items: &[RelayItem], params: &ValidationParams) -> BatchOutcome {
    let expiry_ms = i64::try_from(params.msg_expiry_s.saturating_mul(1000)).unwrap_or(i64::MAX);
    let mut outcome = BatchOutcome::default();

    for (index, item) in items.iter().enumerate() {
        let age_ms = (params.now - item.arrival_time).num_milliseconds();
        if age_ms >= expiry_ms {
            outcome.verdicts.push(Verdict::Rejected(Rejection::TooOld));
            outcome.expired_from = Some(index);
            break;
        }
        let verdict = match check_item(codec, items, index, params) {
            Ok(msg) => Verdict::Accepted(msg),
            Err(rejection) => Verdict::Rejected(rejection),
        };
        outcome.verdicts.push(verdict);
    }

    outcome
}

fn check_item(
    codec: &Codec,
    items: &[RelayItem],
    index: usize,
    params: &ValidationParams,
) -> Result<Message, Rejection> {
    let item = &items[index];
    let frame = codec.frame(item).map_err(rejection_for)?;

    if let Some(nonce) = item.nonce() {
        let replayed = items[index + 1..]
            .iter()
            .filter_map(RelayItem::nonce)
            .any(|older| older == nonce);
        if replayed {
            return Err(Rejection::DuplicateNonce);
        }
    }

    let raw = codec.open(frame).map_err(rejection_for)?;

    let tolerance_ms = i64::try_from(params.tolerance_ms).unwrap_or(i64::MAX);
    match raw.timestamp() {
        None => return Err(Rejection::ClockSkew { offset_ms: None }),
        Some(declared) => {
            let offset_ms = (item.arrival_time - declared).num_milliseconds();
            if offset_ms.saturating_abs() > tolerance_ms {
                return Err(Rejection::ClockSkew {
                    offset_ms: Some(offset_ms),
                });
            }
        }
    }

    raw.into_message()
        .map_err(|e| Rejection::MalformedMessage(e.to_string()))
}

fn rejection_for(err: CodecError) -> Rejection {
    match err {
        CodecError::MalformedEnvelope(reason) => Rejection::MalformedEnvelope(reason),
        CodecError::Cipher(CipherError::MalformedEnvelope(reason)) => {
            Rejection::MalformedEnvelope(reason)
        }
        CodecError::Cipher(CipherError::DecryptFailure) => Rejection::DecryptFailure,
        other => Rejection::MalformedEnvelope(other.to_string()),
    }
}
