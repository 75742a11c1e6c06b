//! Client configuration.
//!
//! Settings are plain serde structs so they can come from a YAML file, from code,
//! or from defaults with the `API_BASE_URL` environment override:
//!
//! ```rust
//! use lpwan_sync::config::{SyncConfig, ValuesRoute};
//!
//! let config = SyncConfig::from_yaml_str(r#"
//! base_url: http://192.168.1.34:8080
//! values_route: values
//! poll_interval_ms: 500
//! event_channel:
//!   address: ws://192.168.1.34:8080/ws
//! "#).unwrap();
//!
//! assert_eq!(config.values_route, ValuesRoute::Values);
//! assert_eq!(config.event_channel.unwrap().heartbeat_interval_ms, 5000);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::{Result, SyncError};

/// Environment variable overriding [`SyncConfig::base_url`].
pub const BASE_URL_ENV: &str = "API_BASE_URL";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Which route serves simulation snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuesRoute {
    /// `GET /values/{id}`
    Values,
    /// `GET /get_values/{id}`
    #[default]
    GetValues,
}

impl ValuesRoute {
    pub fn segment(self) -> &'static str {
        match self {
            ValuesRoute::Values => "values",
            ValuesRoute::GetValues => "get_values",
        }
    }
}

/// HTTP method used to start a simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMethod {
    #[default]
    Post,
    Get,
}

/// Event channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket address, e.g. `ws://host:8080/ws`
    pub address: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_message: String,
    /// First reconnect delay; doubles on every consecutive failure
    pub reconnect_backoff_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_message: "ping".to_string(),
            reconnect_backoff_ms: 500,
        }
    }
}

impl ChannelConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), ..Self::default() }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub base_url: String,
    /// Prefix placed before every REST route
    pub api_prefix: String,
    pub values_route: ValuesRoute,
    pub run_method: RunMethod,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Periodic liveness ping; on-demand only when absent
    pub ping_interval_ms: Option<u64>,
    pub event_channel: Option<ChannelConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: "/api".to_string(),
            values_route: ValuesRoute::default(),
            run_method: RunMethod::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            ping_interval_ms: None,
            event_channel: None,
        }
    }
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml_ng::from_str(yaml).map_err(|e| {
            SyncError::config_error_with_source("invalid YAML configuration", Box::new(e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then apply the environment override.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config_error_with_source(
                format!("cannot read {}", path.display()),
                Box::new(e),
            )
        })?;
        let mut config = Self::from_yaml_str(&yaml)?;
        config.apply_env_override(std::env::var(BASE_URL_ENV).ok());
        config.validate()?;
        debug!(path = %path.display(), base_url = %config.base_url, "Loaded configuration");
        Ok(config)
    }

    /// Defaults with the environment override applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_override(std::env::var(BASE_URL_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env_override(&mut self, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            SyncError::config_error_with_source(
                format!("invalid base URL '{}'", self.base_url),
                Box::new(e),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::config_error(format!(
                "base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.poll_interval_ms == 0 || self.request_timeout_ms == 0 {
            return Err(SyncError::config_error("intervals and timeouts must be non-zero"));
        }
        if self.ping_interval_ms == Some(0) {
            return Err(SyncError::config_error("ping interval must be non-zero"));
        }
        if let Some(channel) = &self.event_channel {
            let address = Url::parse(&channel.address).map_err(|e| {
                SyncError::config_error_with_source(
                    format!("invalid event channel address '{}'", channel.address),
                    Box::new(e),
                )
            })?;
            if !matches!(address.scheme(), "ws" | "wss") {
                return Err(SyncError::config_error(format!(
                    "event channel must use ws or wss, got '{}'",
                    address.scheme()
                )));
            }
            if channel.heartbeat_interval_ms == 0 || channel.reconnect_backoff_ms == 0 {
                return Err(SyncError::config_error(
                    "heartbeat interval and reconnect backoff must be non-zero",
                ));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.values_route.segment(), "get_values");
        assert_eq!(config.run_method, RunMethod::Post);
        assert!(config.ping_interval().is_none());
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let config = SyncConfig::from_yaml_str(
            "base_url: https://sim.example.org\nrun_method: get\nping_interval_ms: 2000\n",
        )
        .unwrap();
        assert_eq!(config.base_url, "https://sim.example.org");
        assert_eq!(config.run_method, RunMethod::Get);
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(2)));
        assert_eq!(config.api_prefix, "/api");
    }

    #[test]
    fn invalid_documents_are_config_errors() {
        for yaml in [
            "base_url: [not, a, string]",
            "base_url: ftp://example.org",
            "poll_interval_ms: 0",
            "event_channel:\n  address: http://not-a-socket",
        ] {
            let err = SyncConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, SyncError::Config { .. }), "{yaml} accepted");
        }
    }

    #[test]
    fn env_override_replaces_base_url() {
        let mut config = SyncConfig::default();
        config.apply_env_override(Some("http://10.0.0.2:9000".into()));
        assert_eq!(config.base_url, "http://10.0.0.2:9000");

        config.apply_env_override(Some("  ".into()));
        assert_eq!(config.base_url, "http://10.0.0.2:9000");
        config.apply_env_override(None);
        assert_eq!(config.base_url, "http://10.0.0.2:9000");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SyncConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
