//! Client configuration.
//!
//! The transport endpoint is derived from the HTTP API base by scheme
//! substitution (`http→ws`, `https→wss`) unless `ws_url` is set explicitly.
//! Both can be overridden from the environment with `PULSE_API_URL` and
//! `PULSE_WS_URL`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;
use crate::reconnect::ReconnectPolicy;

/// Default HTTP API base.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
/// Path of the notification channel under the transport base.
pub const DEFAULT_WS_PATH: &str = "/ws";

pub const ENV_API_URL: &str = "PULSE_API_URL";
pub const ENV_WS_URL: &str = "PULSE_WS_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base HTTP endpoint of the dashboard API.
    pub api_url: String,
    /// Explicit transport base; derived from `api_url` when unset.
    pub ws_url: Option<String>,
    pub ws_path: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Outbound frames buffered per connection before `send` reports backpressure.
    pub outbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            ws_path: DEFAULT_WS_PATH.to_string(),
            heartbeat_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            max_reconnect_attempts: 5,
            outbound_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `PULSE_API_URL` / `PULSE_WS_URL` on top of the current values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_API_URL).ok(),
            std::env::var(ENV_WS_URL).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, ws_url: Option<String>) {
        if let Some(api) = api_url.filter(|s| !s.trim().is_empty()) {
            self.api_url = api;
        }
        if let Some(ws) = ws_url.filter(|s| !s.trim().is_empty()) {
            self.ws_url = Some(ws);
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_delay_ms),
            self.max_reconnect_attempts,
        )
    }

    /// Transport base URL: `ws_url` if set, else `api_url` with its scheme swapped.
    pub fn ws_base(&self) -> Result<Url, TransportError> {
        match &self.ws_url {
            Some(ws) => parse_endpoint(ws),
            None => {
                let api = parse_endpoint(&self.api_url)?;
                let scheme = match api.scheme() {
                    "http" => "ws",
                    "https" => "wss",
                    "ws" | "wss" => return Ok(api),
                    other => {
                        return Err(TransportError::InvalidEndpoint {
                            url: self.api_url.clone(),
                            reason: format!("unsupported scheme '{other}'"),
                        });
                    }
                };
                let swapped = format!("{scheme}{}", &api.as_str()[api.scheme().len()..]);
                parse_endpoint(&swapped)
            }
        }
    }

    /// Full channel endpoint for `identity`, e.g. `ws://host/ws?user_id=42`.
    pub fn endpoint_for(&self, identity: &str) -> Result<Url, TransportError> {
        let mut url = self.ws_base()?;
        let base_path = url.path().trim_end_matches('/').to_string();
        let path = format!("{base_path}/{}", self.ws_path.trim_start_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().append_pair("user_id", identity);
        Ok(url)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, TransportError> {
    Url::parse(raw.trim()).map_err(|e| TransportError::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
