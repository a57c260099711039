//! # sync-types
//!
//! Wire format types for the PiHeat relay synchronization protocol.
//!
//! This crate provides the foundational types used across all piheat-sync crates:
//! - [`ChannelId`], [`CommandId`] - Identity types
//! - [`Envelope`], [`RelayItem`], [`WireMode`] - What travels through the relay
//! - [`Message`] - Plaintext protocol messages (status and command)
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{Envelope, RelayItem, WireMode};
pub use error::SyncError;
pub use ids::{ChannelId, CommandId};
pub use messages::{
    CommandMessage, Interval, LegacyCommand, Message, Override, RawMessage, StatusMessage,
    MINUTES_PER_DAY,
};
