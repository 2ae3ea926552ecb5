//! Configuration file for pulse-tail.
//!
//! Lives at `~/.config/pulse/client.toml` unless `--config` points elsewhere.
//! Connection settings go under a `[client]` table and accept every
//! `ClientConfig` field:
//!
//! ```toml
//! user_id = "42"
//! mark_read = true
//!
//! [client]
//! api_url = "https://dash.example.com"
//! heartbeat_interval_ms = 15000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pulse_sdk::ClientConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Identity to subscribe as.
    pub user_id: Option<String>,
    /// Bearer token for the handshake.
    pub token: Option<String>,
    /// Acknowledge notifications as they are printed.
    pub mark_read: Option<bool>,
    pub client: ClientConfig,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pulse")
        .join("client.toml")
}

impl TailConfig {
    /// Load `explicit`, or the default file if it exists.
    ///
    /// A missing or unreadable default file falls back to defaults with a
    /// warning; an explicit path must load.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }
        let path = default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        match Self::read(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Ignoring config file");
                Ok(Self::default())
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("bad config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = TailConfig::parse(
            r#"
user_id = "42"
token = "abc"
mark_read = true

[client]
api_url = "https://dash.example.com"
heartbeat_interval_ms = 15000
"#,
        )
        .unwrap();
        assert_eq!(config.user_id.as_deref(), Some("42"));
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.mark_read, Some(true));
        assert_eq!(config.client.api_url, "https://dash.example.com");
        assert_eq!(config.client.heartbeat_interval_ms, 15_000);
        assert_eq!(config.client.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(TailConfig::parse("").unwrap(), TailConfig::default());
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(TailConfig::parse("user_id = ").is_err());
        assert!(TailConfig::parse("[client]\nmax_reconnect_attempts = \"many\"").is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let path = std::env::temp_dir().join("pulse-tail-does-not-exist.toml");
        assert!(TailConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_default_path_layout() {
        let path = default_path();
        assert!(path.ends_with("pulse/client.toml"));
    }
}
