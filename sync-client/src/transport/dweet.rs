//! HTTP transport for dweet-style relays.
//!
//! - `GET  {base}/get/dweets/for/{channel}` returns
//!   `{"this": "succeeded", "with": [{"thing", "created", "content"}, ...]}`, newest first
//! - `POST {base}/dweet/for/{channel}` with a JSON body appends an item
//!
//! A channel nobody has published to yet answers 404; that is an empty feed.

use super::{Transport, TransportError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sync_types::{ChannelId, RelayItem};

/// The public relay used by deployed devices.
pub const DEFAULT_RELAY_URL: &str = "https://dweet.io";

/// Transport speaking the dweet HTTP API.
#[derive(Clone, Debug)]
pub struct DweetTransport {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DweetResponse {
    this: String,
    #[serde(default)]
    with: Value,
    #[serde(default)]
    because: Option<String>,
}

impl DweetTransport {
    /// Create a transport for the relay at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client: reqwest::Client::new(),
            base_url,
        }
    }

    /// The relay base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch_url(&self, channel: &ChannelId) -> String {
        format!("{}/get/dweets/for/{}", self.base_url, channel)
    }

    fn publish_url(&self, channel: &ChannelId) -> String {
        format!("{}/dweet/for/{}", self.base_url, channel)
    }
}

impl Default for DweetTransport {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_URL)
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

/// Parse a fetch response body into relay items.
///
/// Items that do not look like relay items are skipped.
fn parse_feed(body: DweetResponse) -> Result<Vec<RelayItem>, TransportError> {
    if body.this != "succeeded" {
        return Err(TransportError::Protocol(
            body.because.unwrap_or_else(|| format!("relay answered {:?}", body.this)),
        ));
    }
    let Value::Array(entries) = body.with else {
        return Err(TransportError::Protocol("\"with\" is not a list".into()));
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<RelayItem>(entry) {
            Ok(item) => items.push(item),
            Err(e) => tracing::debug!("Skipping unreadable relay item: {}", e),
        }
    }
    Ok(items)
}

#[async_trait]
impl Transport for DweetTransport {
    async fn fetch(&self, channel: &ChannelId) -> Result<Vec<RelayItem>, TransportError> {
        let url = self.fetch_url(channel);
        tracing::debug!(%url, "Fetching relay feed");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body: DweetResponse = response.json().await.map_err(|e| {
            TransportError::Protocol(format!("unreadable relay response: {e}"))
        })?;
        parse_feed(body)
    }

    async fn publish(&self, channel: &ChannelId, content: &Value) -> Result<(), TransportError> {
        let url = self.publish_url(channel);
        tracing::debug!(%url, "Publishing to relay");

        let response = self
            .http_client
            .post(&url)
            .json(content)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body: DweetResponse = response.json().await.map_err(|e| {
            TransportError::Protocol(format!("unreadable relay response: {e}"))
        })?;
        if body.this != "succeeded" {
            return Err(TransportError::Protocol(
                body.because.unwrap_or_else(|| format!("relay answered {:?}", body.this)),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> DweetResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn urls_follow_dweet_layout() {
        let transport = DweetTransport::new("https://relay.example/");
        let channel = ChannelId::new("device-42").unwrap();
        assert_eq!(transport.base_url(), "https://relay.example");
        assert_eq!(
            transport.fetch_url(&channel),
            "https://relay.example/get/dweets/for/device-42"
        );
        assert_eq!(
            transport.publish_url(&channel),
            "https://relay.example/dweet/for/device-42"
        );
    }

    #[test]
    fn default_points_at_public_relay() {
        assert_eq!(DweetTransport::default().base_url(), DEFAULT_RELAY_URL);
    }

    #[test]
    fn parses_feed_newest_first() {
        let items = parse_feed(response(json!({
            "this": "succeeded",
            "by": "getting",
            "the": "dweets",
            "with": [
                {"thing": "device-42", "created": "2024-01-01T00:00:02.000Z", "content": {"nonce": "b"}},
                {"thing": "device-42", "created": "2024-01-01T00:00:01.000Z", "content": {"nonce": "a"}}
            ]
        })))
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].nonce(), Some("b"));
        assert_eq!(items[1].nonce(), Some("a"));
    }

    #[test]
    fn skips_unreadable_items() {
        let items = parse_feed(response(json!({
            "this": "succeeded",
            "with": [
                {"thing": "device-42", "created": "yesterday", "content": {}},
                {"thing": "device-42", "created": "2024-01-01T00:00:01Z", "content": {}}
            ]
        })))
        .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn failed_answer_is_protocol_error() {
        let err = parse_feed(response(json!({
            "this": "failed",
            "with": 403,
            "because": "the thing is locked"
        })))
        .unwrap_err();
        assert!(matches!(err, TransportError::Protocol(ref m) if m.contains("locked")));
    }
}
