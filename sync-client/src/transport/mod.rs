//! Relay transport abstraction for piheat-sync.
//!
//! The relay is an opaque, unauthenticated get/put feed keyed by channel:
//! - `fetch()` returns the channel's items, newest first
//! - `publish()` appends content to the channel
//!
//! No filtering by time or nonce happens here; that is sync-core's job.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.publish(&channel, &envelope.to_content()).await?;
//! let items = transport.fetch(&channel).await?;
//! ```

mod dweet;
mod mock;

pub use dweet::{DweetTransport, DEFAULT_RELAY_URL};
pub use mock::MockTransport;

use async_trait::async_trait;
use serde_json::Value;
use sync_types::{ChannelId, RelayItem};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Request(String),

    /// The relay answered with an unexpected HTTP status.
    #[error("relay returned HTTP {0}")]
    Status(u16),

    /// The relay answered with something we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The relay is not reachable.
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

/// Transport trait for reading and appending to a relay channel.
///
/// Implementations handle the underlying relay service
/// (dweet-style HTTP, in-memory mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// All items currently held for `channel`, newest first.
    async fn fetch(&self, channel: &ChannelId) -> Result<Vec<RelayItem>, TransportError>;

    /// Append `content` to `channel`.
    async fn publish(&self, channel: &ChannelId, content: &Value) -> Result<(), TransportError>;
}
