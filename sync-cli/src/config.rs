//! Configuration resolution for piheat.
//!
//! Sources, lowest precedence first: the config file, a share token, then
//! command-line flags. A missing passphrase is prompted for.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sync_client::{ConfigFile, Passphrase, SessionConfig};

/// Config file read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "piheat.toml";

/// Message expiry when no source sets one, in seconds.
pub const DEFAULT_MSG_EXPIRY_S: i64 = 1000;

/// Poll interval when no source sets one, in seconds.
pub const DEFAULT_MSG_UPDATE_S: i64 = 10;

/// Everything the command line contributes to the configuration.
#[derive(Debug, Default)]
pub struct Sources {
    /// Explicit config file; must exist.
    pub config: Option<PathBuf>,
    /// Share token.
    pub token: Option<String>,
    /// Values given as flags.
    pub flags: ConfigFile,
}

/// Read the explicit config file, or `piheat.toml` if it exists.
fn load_file(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                ConfigFile::load(default).context("Failed to load piheat.toml")
            } else {
                Ok(ConfigFile::default())
            }
        }
    }
}

/// Merge all sources and fill CLI defaults. No validation yet.
pub fn merge_sources(sources: Sources) -> Result<ConfigFile> {
    let mut merged = load_file(sources.config.as_deref())?;
    if let Some(token) = sources.token.as_deref() {
        let from_token = ConfigFile::from_share_token(token).context("Invalid share token")?;
        merged = merged.merge(from_token);
    }
    merged = merged.merge(sources.flags);

    merged.default_msg_expiry_s.get_or_insert(DEFAULT_MSG_EXPIRY_S);
    merged.default_msg_update_s.get_or_insert(DEFAULT_MSG_UPDATE_S);
    Ok(merged)
}

/// Merge, prompt for a missing passphrase, validate.
pub fn resolve(sources: Sources) -> Result<SessionConfig> {
    let mut merged = merge_sources(sources)?;
    if merged.passphrase.is_none() {
        if let Some(channel) = merged.channel_id.as_deref() {
            merged.passphrase = Some(prompt_passphrase(channel)?);
        }
    }
    merged
        .into_session_config()
        .context("Invalid configuration")
}

/// Prompt for a passphrase without echo.
fn prompt_passphrase(channel: &str) -> Result<Passphrase> {
    let passphrase = rpassword::prompt_password(format!("Passphrase for {channel}: "))
        .context("Failed to read passphrase")?;

    if passphrase.is_empty() {
        anyhow::bail!("Passphrase must not be empty");
    }

    Ok(Passphrase::new(passphrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn flags_override_file() {
        let file = write_config(
            "channel_id = \"device-42\"\npassphrase = \"hunter2\"\ndefault_msg_update_s = 20\n",
        );
        let merged = merge_sources(Sources {
            config: Some(file.path().to_path_buf()),
            token: None,
            flags: ConfigFile {
                channel_id: Some("device-43".into()),
                ..ConfigFile::default()
            },
        })
        .unwrap();

        assert_eq!(merged.channel_id.as_deref(), Some("device-43"));
        assert_eq!(merged.default_msg_update_s, Some(20));
        assert_eq!(merged.default_msg_expiry_s, Some(DEFAULT_MSG_EXPIRY_S));
    }

    #[test]
    fn token_seeds_channel_and_passphrase() {
        // {"thingid":"device-42","password":"hunter2"}
        let token = "eyJ0aGluZ2lkIjoiZGV2aWNlLTQyIiwicGFzc3dvcmQiOiJodW50ZXIyIn0=";
        let config = resolve(Sources {
            config: Some(write_config("").path().to_path_buf()),
            token: Some(format!("#{token}")),
            flags: ConfigFile::default(),
        })
        .unwrap();

        assert_eq!(config.channel_id.as_str(), "device-42");
        assert_eq!(config.passphrase.expose(), "hunter2");
        assert_eq!(config.default_msg_update_s, 10);
    }

    #[test]
    fn missing_channel_is_reported() {
        let err = resolve(Sources {
            config: Some(write_config("").path().to_path_buf()),
            ..Sources::default()
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("channel_id"));
    }

    #[test]
    fn explicit_missing_file_fails() {
        let err = merge_sources(Sources {
            config: Some(PathBuf::from("/nonexistent/piheat.toml")),
            ..Sources::default()
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/piheat.toml"));
    }
}
