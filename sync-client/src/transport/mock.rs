//! Mock transport for testing.
//!
//! An in-memory relay: holds a newest-first feed per channel, records what
//! was published, and can be told to fail.

use super::{Transport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use sync_types::{ChannelId, RelayItem};

/// Mock transport for testing.
///
/// Clones share the same in-memory relay.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    feeds: HashMap<String, Vec<RelayItem>>,
    published: Vec<(String, Value)>,
    fetch_count: usize,
    fail_next_fetch: Option<String>,
    fail_next_publish: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put an item on top of a channel's feed (newest).
    pub fn push_item(&self, channel: &ChannelId, item: RelayItem) {
        let mut inner = self.lock();
        inner
            .feeds
            .entry(channel.as_str().to_string())
            .or_default()
            .insert(0, item);
    }

    /// Replace a channel's feed (newest first).
    pub fn set_feed(&self, channel: &ChannelId, items: Vec<RelayItem>) {
        let mut inner = self.lock();
        inner.feeds.insert(channel.as_str().to_string(), items);
    }

    /// The current feed of a channel, newest first.
    pub fn feed(&self, channel: &ChannelId) -> Vec<RelayItem> {
        let inner = self.lock();
        inner.feeds.get(channel.as_str()).cloned().unwrap_or_default()
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<(String, Value)> {
        let inner = self.lock();
        inner.published.clone()
    }

    /// Number of `fetch()` calls so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        let inner = self.lock();
        inner.fetch_count
    }

    /// Cause the next fetch() to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next publish() to fail with the given error.
    pub fn fail_next_publish(&self, error: &str) {
        let mut inner = self.lock();
        inner.fail_next_publish = Some(error.to_string());
    }

    /// Clear all state (feeds, publish log, failures).
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, channel: &ChannelId) -> Result<Vec<RelayItem>, TransportError> {
        let mut inner = self.lock();
        inner.fetch_count += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(TransportError::Unavailable(error));
        }

        Ok(inner.feeds.get(channel.as_str()).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &ChannelId, content: &Value) -> Result<(), TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_publish.take() {
            return Err(TransportError::Request(error));
        }

        inner
            .published
            .push((channel.as_str().to_string(), content.clone()));
        inner
            .feeds
            .entry(channel.as_str().to_string())
            .or_default()
            .insert(0, RelayItem::new(Utc::now(), content.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> ChannelId {
        ChannelId::new("device-42").unwrap()
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn empty_channel_fetches_nothing() {
        let transport = MockTransport::new();
        assert!(transport.fetch(&channel()).await.unwrap().is_empty());
        assert_eq!(transport.fetch_count(), 1);
    }

    #[tokio::test]
    async fn publish_lands_newest_first() {
        let transport = MockTransport::new();
        transport.publish(&channel(), &json!({"n": 1})).await.unwrap();
        transport.publish(&channel(), &json!({"n": 2})).await.unwrap();

        let items = transport.fetch(&channel()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, json!({"n": 2}));
        assert_eq!(items[1].content, json!({"n": 1}));
        assert_eq!(transport.published().len(), 2);
    }

    #[tokio::test]
    async fn channels_are_separate() {
        let transport = MockTransport::new();
        let other = ChannelId::new("device-43").unwrap();
        transport.publish(&other, &json!({})).await.unwrap();
        assert!(transport.fetch(&channel()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forced_failures_fire_once() {
        let transport = MockTransport::new();
        transport.fail_next_fetch("relay down");
        transport.fail_next_publish("relay down");

        assert!(matches!(
            transport.fetch(&channel()).await,
            Err(TransportError::Unavailable(_))
        ));
        assert!(transport.fetch(&channel()).await.is_ok());

        assert!(transport.publish(&channel(), &json!({})).await.is_err());
        assert!(transport.publish(&channel(), &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let transport = MockTransport::new();
        let clone = transport.clone();
        clone.push_item(&channel(), RelayItem::new(Utc::now(), json!({"a": 1})));
        assert_eq!(transport.feed(&channel()).len(), 1);

        transport.reset();
        assert!(clone.feed(&channel()).is_empty());
    }
}
