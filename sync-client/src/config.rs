//! Session configuration for piheat-sync.
//!
//! Configuration comes from a TOML file (e.g. `piheat.toml`), a share token,
//! or code. Every source produces a [`ConfigFile`] with all fields optional;
//! sources are merged and then validated into a [`SessionConfig`].
//!
//! ```toml
//! channel_id = "device-42"
//! passphrase = "hunter2"
//! default_msg_expiry_s = 30
//! default_msg_update_s = 10
//! wire_mode = "encrypted"
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{PollTiming, DEFAULT_TOLERANCE_MS, MIN_INTERVAL_S};
use sync_types::{ChannelId, WireMode};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::transport::DEFAULT_RELAY_URL;

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required key is absent or empty.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A numeric key is below its minimum.
    #[error("{field} must be >= {min}, got {actual}")]
    OutOfRange {
        /// The offending key.
        field: &'static str,
        /// Smallest allowed value.
        min: i64,
        /// The configured value.
        actual: i64,
    },

    /// A key has an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse configuration.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The share token is not base64 JSON.
    #[error("invalid share token: {0}")]
    ShareToken(String),
}

/// The shared secret. Never transmitted; zeroized on drop.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wrap a passphrase.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }

    /// Get the passphrase text.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// Unvalidated configuration, as read from a file or token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Relay channel.
    pub channel_id: Option<String>,
    /// Shared passphrase.
    pub passphrase: Option<Passphrase>,
    /// Initial message expiry.
    pub default_msg_expiry_s: Option<i64>,
    /// Initial poll period.
    pub default_msg_update_s: Option<i64>,
    /// `encrypted` or `legacy-cleartext`.
    pub wire_mode: Option<String>,
    /// Allowed arrival/timestamp difference.
    pub tolerance_ms: Option<i64>,
    /// Poll period while a command result is expected.
    pub fast_poll_interval_s: Option<i64>,
    /// Delay after a failed fetch.
    pub retry_delay_s: Option<i64>,
    /// Relay base URL.
    pub relay_url: Option<String>,
}

/// Share token payload, as stored in the web client's link hash.
#[derive(Serialize, Deserialize)]
struct ShareToken {
    thingid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl ConfigFile {
    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Channel and (optionally) passphrase from a share token:
    /// base64 of `{"thingid": ..., "password": ...}`.
    pub fn from_share_token(token: &str) -> Result<Self, ConfigError> {
        let bytes = STANDARD
            .decode(token.trim().trim_start_matches('#'))
            .map_err(|e| ConfigError::ShareToken(e.to_string()))?;
        let parsed: ShareToken =
            serde_json::from_slice(&bytes).map_err(|e| ConfigError::ShareToken(e.to_string()))?;
        Ok(Self {
            channel_id: Some(parsed.thingid),
            passphrase: parsed.password.map(Passphrase::new),
            ..Self::default()
        })
    }

    /// Overlay `other` on top of `self`; values set in `other` win.
    pub fn merge(mut self, mut other: ConfigFile) -> Self {
        fn pick<T>(base: &mut Option<T>, over: &mut Option<T>) {
            if over.is_some() {
                *base = over.take();
            }
        }
        pick(&mut self.channel_id, &mut other.channel_id);
        pick(&mut self.passphrase, &mut other.passphrase);
        pick(&mut self.default_msg_expiry_s, &mut other.default_msg_expiry_s);
        pick(&mut self.default_msg_update_s, &mut other.default_msg_update_s);
        pick(&mut self.wire_mode, &mut other.wire_mode);
        pick(&mut self.tolerance_ms, &mut other.tolerance_ms);
        pick(&mut self.fast_poll_interval_s, &mut other.fast_poll_interval_s);
        pick(&mut self.retry_delay_s, &mut other.retry_delay_s);
        pick(&mut self.relay_url, &mut other.relay_url);
        self
    }

    /// Validate into a session configuration.
    ///
    /// Fails on the first unmet constraint, checking required keys first.
    pub fn into_session_config(self) -> Result<SessionConfig, ConfigError> {
        let channel = match self.channel_id.as_deref() {
            None | Some("") => return Err(ConfigError::Missing("channel_id")),
            Some(id) => ChannelId::new(id).map_err(|e| ConfigError::Invalid {
                field: "channel_id",
                reason: e.to_string(),
            })?,
        };
        let expiry = require_min(
            "default_msg_expiry_s",
            self.default_msg_expiry_s,
            MIN_INTERVAL_S as i64,
        )?;
        let update = require_min(
            "default_msg_update_s",
            self.default_msg_update_s,
            MIN_INTERVAL_S as i64,
        )?;
        let passphrase = match self.passphrase {
            Some(p) if !p.expose().is_empty() => p,
            _ => return Err(ConfigError::Missing("passphrase")),
        };

        let mut config = SessionConfig::new(channel, passphrase, expiry, update);

        if let Some(mode) = self.wire_mode.as_deref() {
            config.wire_mode = mode.parse().map_err(|_| ConfigError::Invalid {
                field: "wire_mode",
                reason: format!("expected \"encrypted\" or \"legacy-cleartext\", got {mode:?}"),
            })?;
        }
        if let Some(ms) = self.tolerance_ms {
            config.tolerance_ms = require_min("tolerance_ms", Some(ms), 0)?;
        }
        if let Some(s) = self.fast_poll_interval_s {
            config.fast_poll_interval_s = require_min("fast_poll_interval_s", Some(s), 1)?;
        }
        if let Some(s) = self.retry_delay_s {
            config.retry_delay_s = require_min("retry_delay_s", Some(s), 1)?;
        }
        if let Some(url) = self.relay_url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "relay_url",
                    reason: format!("expected an http(s) URL, got {url:?}"),
                });
            }
            config.relay_url = url.to_string();
        }

        Ok(config)
    }
}

fn require_min(field: &'static str, value: Option<i64>, min: i64) -> Result<u64, ConfigError> {
    let actual = value.ok_or(ConfigError::Missing(field))?;
    if actual < min {
        return Err(ConfigError::OutOfRange { field, min, actual });
    }
    u64::try_from(actual).map_err(|_| ConfigError::OutOfRange { field, min, actual })
}

/// Validated configuration of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay channel shared with the device.
    pub channel_id: ChannelId,
    /// Shared passphrase.
    pub passphrase: Passphrase,
    /// Message expiry until the device says otherwise.
    pub default_msg_expiry_s: u64,
    /// Poll period until the device says otherwise.
    pub default_msg_update_s: u64,
    /// Protocol generation.
    pub wire_mode: WireMode,
    /// Allowed arrival/timestamp difference.
    pub tolerance_ms: u64,
    /// Poll period while a command result is expected.
    pub fast_poll_interval_s: u64,
    /// Delay after a failed fetch.
    pub retry_delay_s: u64,
    /// Relay base URL.
    pub relay_url: String,
}

impl SessionConfig {
    /// Create a configuration with default tuning.
    pub fn new(
        channel_id: ChannelId,
        passphrase: Passphrase,
        default_msg_expiry_s: u64,
        default_msg_update_s: u64,
    ) -> Self {
        Self {
            channel_id,
            passphrase,
            default_msg_expiry_s,
            default_msg_update_s,
            wire_mode: WireMode::default(),
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            fast_poll_interval_s: sync_core::DEFAULT_FAST_POLL_INTERVAL.as_secs(),
            retry_delay_s: sync_core::DEFAULT_RETRY_DELAY.as_secs(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
        }
    }

    /// Set the wire mode.
    pub fn with_wire_mode(mut self, mode: WireMode) -> Self {
        self.wire_mode = mode;
        self
    }

    /// Set the timestamp tolerance.
    pub fn with_tolerance_ms(mut self, tolerance_ms: u64) -> Self {
        self.tolerance_ms = tolerance_ms;
        self
    }

    /// Set the relay URL.
    pub fn with_relay_url(mut self, url: &str) -> Self {
        self.relay_url = url.to_string();
        self
    }

    /// Re-check constraints on a configuration built in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.passphrase.expose().is_empty() {
            return Err(ConfigError::Missing("passphrase"));
        }
        for (field, value, min) in [
            ("default_msg_expiry_s", self.default_msg_expiry_s, MIN_INTERVAL_S),
            ("default_msg_update_s", self.default_msg_update_s, MIN_INTERVAL_S),
            ("fast_poll_interval_s", self.fast_poll_interval_s, 1),
            ("retry_delay_s", self.retry_delay_s, 1),
        ] {
            if value < min {
                return Err(ConfigError::OutOfRange {
                    field,
                    min: min as i64,
                    actual: value as i64,
                });
            }
        }
        Ok(())
    }

    /// Scheduler timing derived from this configuration.
    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            fast_poll_interval: Duration::from_secs(self.fast_poll_interval_s),
            retry_delay: Duration::from_secs(self.retry_delay_s),
        }
    }

    /// A token that seeds another client with this channel and, if
    /// `include_passphrase`, the passphrase.
    pub fn share_token(&self, include_passphrase: bool) -> String {
        let token = ShareToken {
            thingid: self.channel_id.to_string(),
            password: include_passphrase.then(|| self.passphrase.expose().to_string()),
        };
        // Serializing two strings cannot fail
        let json = serde_json::to_vec(&token).unwrap_or_default();
        STANDARD.encode(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
channel_id = "device-42"
passphrase = "hunter2"
default_msg_expiry_s = 30
default_msg_update_s = 10
"#;

    #[test]
    fn config_from_toml_string() {
        let config = ConfigFile::from_toml_str(FULL)
            .unwrap()
            .into_session_config()
            .unwrap();
        assert_eq!(config.channel_id.as_str(), "device-42");
        assert_eq!(config.passphrase.expose(), "hunter2");
        assert_eq!(config.default_msg_expiry_s, 30);
        assert_eq!(config.default_msg_update_s, 10);
    }

    #[test]
    fn optional_keys_have_defaults() {
        let config = ConfigFile::from_toml_str(FULL)
            .unwrap()
            .into_session_config()
            .unwrap();
        assert_eq!(config.wire_mode, WireMode::Encrypted);
        assert_eq!(config.tolerance_ms, 30_000);
        assert_eq!(config.fast_poll_interval_s, 7);
        assert_eq!(config.retry_delay_s, 5);
        assert_eq!(config.relay_url, "https://dweet.io");
    }

    #[test]
    fn optional_keys_from_toml() {
        let text = format!(
            "{FULL}wire_mode = \"legacy-cleartext\"\ntolerance_ms = 5000\nrelay_url = \"http://localhost:8080\"\n"
        );
        let config = ConfigFile::from_toml_str(&text)
            .unwrap()
            .into_session_config()
            .unwrap();
        assert_eq!(config.wire_mode, WireMode::LegacyCleartext);
        assert_eq!(config.tolerance_ms, 5000);
        assert_eq!(config.relay_url, "http://localhost:8080");
    }

    #[test]
    fn missing_channel_is_first_error() {
        let err = ConfigFile::default().into_session_config().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("channel_id")));
    }

    #[test]
    fn empty_channel_is_missing() {
        let file = ConfigFile {
            channel_id: Some(String::new()),
            ..ConfigFile::default()
        };
        assert!(matches!(
            file.into_session_config(),
            Err(ConfigError::Missing("channel_id"))
        ));
    }

    #[test]
    fn expiry_below_floor_is_rejected() {
        let text = FULL.replace("default_msg_expiry_s = 30", "default_msg_expiry_s = 4");
        let err = ConfigFile::from_toml_str(&text)
            .unwrap()
            .into_session_config()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "default_msg_expiry_s",
                min: 5,
                actual: 4
            }
        ));
    }

    #[test]
    fn missing_passphrase_is_rejected() {
        let text = FULL.replace("passphrase = \"hunter2\"", "");
        let err = ConfigFile::from_toml_str(&text)
            .unwrap()
            .into_session_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("passphrase")));
    }

    #[test]
    fn unknown_wire_mode_is_invalid() {
        let text = format!("{FULL}wire_mode = \"rot13\"\n");
        let err = ConfigFile::from_toml_str(&text)
            .unwrap()
            .into_session_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "wire_mode", .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigFile::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = ConfigFile::load(file.path()).unwrap();
        assert_eq!(config.channel_id.as_deref(), Some("device-42"));
    }

    #[test]
    fn load_missing_file_fails() {
        let err = ConfigFile::load(Path::new("/nonexistent/piheat.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn merge_prefers_overlay() {
        let base = ConfigFile::from_toml_str(FULL).unwrap();
        let overlay = ConfigFile {
            channel_id: Some("device-43".into()),
            ..ConfigFile::default()
        };
        let merged = base.merge(overlay);
        assert_eq!(merged.channel_id.as_deref(), Some("device-43"));
        assert_eq!(merged.passphrase.as_ref().map(Passphrase::expose), Some("hunter2"));
    }

    #[test]
    fn share_token_round_trip() {
        let config = ConfigFile::from_toml_str(FULL)
            .unwrap()
            .into_session_config()
            .unwrap();

        let token = config.share_token(true);
        let file = ConfigFile::from_share_token(&token).unwrap();
        assert_eq!(file.channel_id.as_deref(), Some("device-42"));
        assert_eq!(file.passphrase.as_ref().map(Passphrase::expose), Some("hunter2"));

        let without = ConfigFile::from_share_token(&config.share_token(false)).unwrap();
        assert_eq!(without.passphrase, None);
    }

    #[test]
    fn share_token_from_web_client() {
        // base64 of {"thingid":"device-42","password":"hunter2"}
        let token = STANDARD.encode(r#"{"thingid":"device-42","password":"hunter2"}"#);
        let file = ConfigFile::from_share_token(&format!("#{token}")).unwrap();
        assert_eq!(file.channel_id.as_deref(), Some("device-42"));
    }

    #[test]
    fn bad_share_token() {
        assert!(matches!(
            ConfigFile::from_share_token("%%%"),
            Err(ConfigError::ShareToken(_))
        ));
    }

    #[test]
    fn passphrase_debug_is_redacted() {
        let p = Passphrase::new("hunter2");
        assert_eq!(format!("{p:?}"), "Passphrase([REDACTED])");
        let file = ConfigFile::from_toml_str(FULL).unwrap();
        assert!(!format!("{file:?}").contains("hunter2"));
    }

    #[test]
    fn validate_catches_code_built_mistakes() {
        let config = SessionConfig::new(
            ChannelId::new("device-42").unwrap(),
            Passphrase::new("hunter2"),
            3,
            10,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "default_msg_expiry_s",
                ..
            })
        ));
    }
}
