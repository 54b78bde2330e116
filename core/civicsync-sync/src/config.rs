//! Resource descriptors and sync configuration.

use crate::error::{SyncError, SyncResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Default fetch timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default delay between push reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Describes one synchronized resource (jobs, live devices, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Short identifier; also names the store table (`[a-z0-9_]+`).
    pub name: String,
    /// Human label used in notifications. Defaults to `name`.
    #[serde(default)]
    pub label: Option<String>,
    /// HTTP(S) endpoint returning the collection.
    pub endpoint: String,
    /// Per-resource fetch timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// WebSocket URL of the push feed, if the resource has one.
    #[serde(default)]
    pub push_url: Option<String>,
    /// Background refresh interval, if the resource is polled.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Payload field shown in new-item notifications.
    #[serde(default)]
    pub notify_field: Option<String>,
}

impl ResourceDescriptor {
    /// Creates a descriptor with only the required fields.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            endpoint: endpoint.into(),
            timeout_ms: None,
            push_url: None,
            poll_interval_ms: None,
            notify_field: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = Some(interval_ms);
        self
    }

    pub fn with_notify_field(mut self, field: impl Into<String>) -> Self {
        self.notify_field = Some(field.into());
        self
    }

    /// Label for user-facing text.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Effective fetch timeout.
    pub fn timeout(&self, config: &SyncConfig) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(config.default_timeout_ms))
    }

    /// Background refresh interval, if any.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// Parsed collection endpoint.
    pub fn endpoint_url(&self) -> SyncResult<Url> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| SyncError::InvalidConfig(format!("endpoint `{}`: {e}", self.endpoint)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SyncError::InvalidConfig(format!(
                "endpoint scheme `{other}` is not http(s)"
            ))),
        }
    }

    /// Checks every field that feeds SQL, URLs or timers.
    pub fn validate(&self) -> SyncResult<()> {
        civicsync_storage::table_name_for(&self.name)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        self.endpoint_url()?;
        if let Some(push) = &self.push_url {
            let url = Url::parse(push)
                .map_err(|e| SyncError::InvalidConfig(format!("push url `{push}`: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(SyncError::InvalidConfig(format!(
                    "push url scheme `{}` is not ws(s)",
                    url.scheme()
                )));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(SyncError::InvalidConfig("timeout must be positive".into()));
        }
        if self.poll_interval_ms == Some(0) {
            return Err(SyncError::InvalidConfig("poll interval must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration shared by every resource of one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fetch timeout when the descriptor does not set one (ms).
    pub default_timeout_ms: u64,
    /// Fixed push reconnection delay (ms).
    pub reconnect_delay_ms: u64,
    /// Message sent right after the push handshake to request a full
    /// snapshot.
    pub init_message: Value,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            init_message: json!({ "type": "INIT" }),
        }
    }
}

impl SyncConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
